//! Media Reconciler - keeps a creator's media library and its identity
//! records in agreement.
//!
//! Files on disk carry identity signals in their names (`_id_<n>`,
//! `_hash_<hex>`); the identity store holds one record per logical media
//! item. The [`pipeline`] walks a library, runs the legacy marker
//! [`migration`], [`reconcile`]s every candidate and [`verify`]s that
//! downloaded records still point at real files.

pub mod config;
pub mod db;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod migration;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod scanner;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod verify;

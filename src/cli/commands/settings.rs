//! Config file management.

use media_reconciler::config::{self, Config};

/// Print the config path and effective values, or write them with `--init`
pub fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        let path = config::save(config)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    match config::config_path() {
        Some(path) if path.exists() => println!("# {}", path.display()),
        Some(path) => println!("# {} (not created, using defaults)", path.display()),
        None => println!("# no config directory on this platform"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

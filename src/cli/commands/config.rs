//! Config command implementations

use crate::config::{default_config_path, save_config, ConfigError, GlobalConfig, NetworkType};

/// Initialize configuration file with network-specific defaults
pub fn init(network: Option<String>) -> Result<(), ConfigError> {
    let network_type = match network.as_deref() {
        Some(n) => n.parse::<NetworkType>()?,
        None => NetworkType::Regtest,
    };

    let config = GlobalConfig::for_network(network_type);
    save_config(&config, None)?;

    let config_path = default_config_path()?;
    println!("✓ Configuration initialized for {:?}", network_type);
    println!("  Config file: {}", config_path.display());
    println!("  Esplora:     {}", config.bitcoin.esplora_url);
    println!("  Metadata:    {}", config.services.metadata_url);
    println!("  Directory:   {}", config.services.directory_url);

    Ok(())
}

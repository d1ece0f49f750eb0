use config::{Config, Environment, File, FileFormat};

pub mod settings;

pub const REFERENCE: &str = include_str!("reference.toml");

/// Builds the layered configuration: embedded defaults, then an optional TOML file, then
/// `FLEET__SECTION__KEY` environment variables.
pub fn load(path: Option<&str>) -> anyhow::Result<Config> {
    let mut builder = Config::builder()
        .add_source(File::from_str(REFERENCE, FileFormat::Toml));
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).format(FileFormat::Toml));
    }
    let config = builder
        .add_source(
            Environment::with_prefix("FLEET")
                .separator("__")
                .keep_prefix(true)
                .try_parsing(true)
        )
        .build()?;
    Ok(config)
}

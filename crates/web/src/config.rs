use config::{Config, File, FileFormat};

/// Runtime configuration read from the INI file.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub api_key_primary: String,
    pub api_key_secondary: String,
    pub interesting_stops: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Read(#[from] config::ConfigError),
}

/// Reads the INI configuration. The `NTA` section is the original name of
/// `ApiKeys`; both are accepted.
pub fn read_config(filename: &str) -> Result<Configuration, ConfigurationError> {
    log::info!("Reading {:?}", filename);

    let config = Config::builder()
        .add_source(File::new(filename, FileFormat::Ini))
        .build()?;

    let section = if config.get_table("NTA").is_ok() {
        "NTA"
    } else {
        "ApiKeys"
    };
    let api_key_primary = config.get_string(&format!("{section}.PrimaryApiKey"))?;
    let api_key_secondary = config.get_string(&format!("{section}.SecondaryApiKey"))?;

    let interesting_stops = match config.get_string("Upcoming.InterestingStopIds") {
        Ok(ids) if !ids.is_empty() => ids.split(',').map(str::to_owned).collect(),
        _ => Vec::new(),
    };

    Ok(Configuration {
        api_key_primary,
        api_key_secondary,
        interesting_stops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testdata(name: &str) -> String {
        format!("{}/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn reads_the_nta_section() {
        let config = read_config(&testdata("config.ini")).expect("read config");
        assert_eq!(config.api_key_primary, "primary-key");
        assert_eq!(config.api_key_secondary, "secondary-key");
        assert_eq!(
            config.interesting_stops,
            ["8220DB000490", "8250DB003076"]
        );
    }

    #[test]
    fn falls_back_to_the_apikeys_section() {
        let config = read_config(&testdata("apikeys.ini")).expect("read config");
        assert_eq!(config.api_key_primary, "primary-key");
        assert!(config.interesting_stops.is_empty());
    }

    #[test]
    fn missing_keys_are_an_error() {
        assert!(read_config(&testdata("incomplete.ini")).is_err());
    }

    #[test]
    fn missing_files_are_an_error() {
        assert!(read_config(&testdata("no-such.ini")).is_err());
    }
}

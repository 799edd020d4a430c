/// Default location of the demo config file
pub const DEFAULT_CONFIG_PATH: &str = "config/demo.toml";

/// Parses the config file path from command-line arguments
pub fn get_config_path(default: &str) -> String {
    config_path_from(std::env::args(), default)
}

fn config_path_from<I: IntoIterator<Item = String>>(args: I, default: &str) -> String {
    args.into_iter().nth(1).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let args = vec!["ag_demo".to_string(), "custom.toml".to_string()];
        assert_eq!(config_path_from(args, DEFAULT_CONFIG_PATH), "custom.toml");

        let args = vec!["ag_demo".to_string()];
        assert_eq!(config_path_from(args, DEFAULT_CONFIG_PATH), DEFAULT_CONFIG_PATH);
    }
}

// Command line arguments

use clap::Parser;

use crate::monitor::log_list::LOG_LIST_URL;

/// Real-time Certificate Transparency log streaming over WebSockets
#[derive(Parser, Debug, Clone)]
#[command(name = "ctlstream", version)]
pub struct Args {
    /// Never include cert_pem in emitted records
    #[arg(long)]
    pub nocert: bool,

    /// Address to listen on for WebSocket subscribers
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Override the authoritative CT log list URL
    #[arg(long = "log-list-url", default_value = LOG_LIST_URL)]
    pub log_list_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["ctlstream"]);

        assert!(!args.nocert);
        assert_eq!(args.listen, "0.0.0.0:8080");
        assert_eq!(args.log_list_url, LOG_LIST_URL);
    }

    #[test]
    fn test_nocert_flag() {
        let args = Args::parse_from(["ctlstream", "--nocert"]);
        assert!(args.nocert);
    }
}

use clap::{Parser, ValueEnum};

/// Market data cache and refresh job service.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Log output format. Defaults to pretty in debug builds and JSON in release builds.
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

/// Long-running services the application supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceName {
    Web,
    JobSweeper,
}

impl ServiceName {
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Web, ServiceName::JobSweeper]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_flag_parses() {
        let args = Args::parse_from(["marketstats", "--tracing", "json"]);
        assert_eq!(args.tracing, TracingFormat::Json);
        assert!(Args::try_parse_from(["marketstats", "--tracing", "xml"]).is_err());
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON config file (missing keys keep their defaults)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long, global = true)]
    pub rate_limit: Option<u32>,

    /// Parallel segment workers per file
    #[arg(short = 'c', long, global = true)]
    pub concurrency: Option<usize>,

    /// Proxy URL used for every request
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Hide progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one archive
    Fetch {
        url: String,

        /// Directory to save into; the file name comes from the response
        #[arg(short = 'd', long = "dir", default_value = "downloads")]
        dir: PathBuf,

        /// Name used when the response does not suggest one
        #[arg(short = 'n', long = "name", default_value = "unnamed")]
        name: String,

        /// Exact output file (overrides --dir/--name)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Replace an existing file instead of skipping it
        #[arg(long)]
        overwrite: bool,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Extra query parameter, `key=value` (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Download every entry of a tasks file in the background pool
    Prefetch {
        /// One `url|file_name` per line, file name optional
        #[arg(short = 't', long = "tasks-file", default_value = "prefetch.txt")]
        tasks_file: PathBuf,

        #[arg(short = 'd', long = "dir", default_value = "downloads")]
        dir: PathBuf,
    },

    /// Print the segments and Range headers planned for a file size
    Plan {
        size: u64,

        #[arg(short = 's', long = "segment-size")]
        segment_size: Option<u64>,
    },

    /// Print the SHA-256 of a file
    Digest { file: PathBuf },
}

pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `key=value`, got {raw:?}"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_param_parsing() {
        assert_eq!(
            parse_header("User-Agent: mirror/1.0").unwrap(),
            ("User-Agent".to_string(), "mirror/1.0".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert_eq!(
            parse_param("build=IC-231").unwrap(),
            ("build".to_string(), "IC-231".to_string())
        );
    }

    #[test]
    fn fetch_command_parses() {
        let args = Args::try_parse_from([
            "pmirror",
            "--no-progress",
            "fetch",
            "https://host/a.zip",
            "-H",
            "Accept: */*",
            "--overwrite",
        ])
        .unwrap();
        match args.command {
            Command::Fetch { url, headers, overwrite, .. } => {
                assert_eq!(url, "https://host/a.zip");
                assert_eq!(headers.len(), 1);
                assert!(overwrite);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(args.no_progress);
    }
}

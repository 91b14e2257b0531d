use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Command-line surface, kept deliberately close to classic zsync.
#[derive(Debug, Parser)]
#[command(
    name = "rzsync",
    version,
    about = "Fetch a file over HTTP, reusing blocks from local files",
    after_help = "The control (.zsync) argument may be a URL or a local path.\n\
                  With a local control file, pass -u to say where it was\n\
                  downloaded from so relative target URLs can be resolved."
)]
pub struct Options {
    /// URL or local path of the .zsync control file.
    #[arg(value_name = "CONTROL")]
    pub control: String,

    /// Write the target to this path instead of the advertised filename.
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Offer a local file as a seed; may be given multiple times.
    #[arg(short = 'i', value_name = "FILE")]
    pub seeds: Vec<PathBuf>,

    /// Save the downloaded control file here for later reuse.
    #[arg(short = 'k', value_name = "FILE")]
    pub save_control: Option<PathBuf>,

    /// URL the control file was originally downloaded from; used as the
    /// base for relative target URLs and sent as the Referer.
    #[arg(short = 'u', value_name = "URL")]
    pub referer: Option<String>,

    /// Print errors only.
    #[arg(short = 'q', action = ArgAction::Count)]
    pub quiet: u8,

    /// More detail on progress; repeat for debug output.
    #[arg(short = 'v', action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_switches_parse() {
        let options = Options::try_parse_from([
            "rzsync",
            "-o",
            "out.iso",
            "-i",
            "old.iso",
            "-i",
            "older.iso",
            "-k",
            "saved.zsync",
            "-u",
            "http://example.com/dir/",
            "-v",
            "http://example.com/dir/file.zsync",
        ])
        .unwrap();

        assert_eq!(options.control, "http://example.com/dir/file.zsync");
        assert_eq!(options.output.as_deref().unwrap().to_str(), Some("out.iso"));
        assert_eq!(options.seeds.len(), 2);
        assert!(options.save_control.is_some());
        assert_eq!(options.referer.as_deref(), Some("http://example.com/dir/"));
        assert_eq!(options.verbose, 1);
        assert_eq!(options.quiet, 0);
    }

    #[test]
    fn control_argument_is_required() {
        assert!(Options::try_parse_from(["rzsync"]).is_err());
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Options::try_parse_from(["rzsync", "-q", "-v", "x"]).is_err());
    }
}

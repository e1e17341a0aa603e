//! `mtce-faststart`: standalone CLI wrapping the faststart decision ladder
//! (spec §4.B), mirroring `mp4cli`'s option-struct-per-binary shape but
//! with no subcommands, since there is only one operation to expose.

use std::path::PathBuf;
use std::process::ExitCode;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct MainOpts {
    /// Log options (like RUST_LOG; trace, debug, info etc)
    #[structopt(long)]
    pub log: Option<String>,

    /// Path to the ffmpeg binary.
    #[structopt(long, default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// Path to the ffprobe binary.
    #[structopt(long, default_value = "ffprobe")]
    pub ffprobe: String,

    /// Media file to inspect and, if needed, rewrite in place.
    pub input: PathBuf,
}

fn main() -> ExitCode {
    let opts = match MainOpts::from_iter_safe(std::env::args_os()) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let mut builder = env_logger::Builder::new();
    if let Some(ref log_opts) = opts.log {
        builder.parse_filters(log_opts);
    } else if let Ok(ref log_opts) = std::env::var("RUST_LOG") {
        builder.parse_filters(log_opts);
    } else {
        builder.parse_filters("info");
    }
    builder.init();

    // Spec §4.B: any processing exception is logged and swallowed, never
    // turned into a nonzero exit. Only bad CLI usage (handled above, since
    // clap's own default exit code for a parse error is 1, not the 2 this
    // CLI's contract requires) uses code 2.
    let outcome = mtce_core::faststart::process(&opts.input, &opts.ffmpeg, &opts.ffprobe);
    log::info!("{}: {:?}", opts.input.display(), outcome);

    ExitCode::SUCCESS
}

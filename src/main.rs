use arcapture_lib::RunOptions;
use std::path::PathBuf;

const USAGE: &str = "usage: arcapture [--config PATH] [--sessions N]";

fn parse_args(args: &[String]) -> Result<RunOptions, String> {
    let mut options = RunOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                options.config_path = Some(PathBuf::from(path));
            }
            "--sessions" => {
                let n = iter.next().ok_or("--sessions needs a number")?;
                options.sessions = Some(n.parse().map_err(|_| format!("invalid session count '{}'", n))?);
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument '{}'\n{}", other, USAGE)),
        }
    }
    Ok(options)
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    if let Err(e) = arcapture_lib::run(options) {
        eprintln!("[ARCapture] {:#}", e);
        std::process::exit(1);
    }
}

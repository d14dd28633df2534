use std::process::ExitCode;

fn main() -> ExitCode {
    autoxloo_cli::run()
}

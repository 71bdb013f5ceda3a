use std::process::ExitCode;

fn main() -> ExitCode {
    match refcheckout::cli::run() {
        Ok(code) => code,
        Err(e) => {
            refcheckout::ui::output::error(format!("{e:#}"));
            ExitCode::from(refcheckout::cli::USAGE_EXIT)
        }
    }
}

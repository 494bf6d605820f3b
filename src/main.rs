use phasebench::app::run::{RunOutcome, main_with_error};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match main_with_error().await {
        Ok(RunOutcome::Client(report)) => {
            print!("{}", report);
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Ok(RunOutcome::Server) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

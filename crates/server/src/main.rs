mod app;

use std::process::ExitCode;

use tracing::error;

fn main() -> ExitCode {
    match app::build_app() {
        Ok(wiring) => app::run(wiring),
        Err(err) => {
            report_startup_failure(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_startup_failure(err: &app::StartupError) {
    error!(error = %err, "startup_failed");
}

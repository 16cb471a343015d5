//! Shared plumbing for the administrative command line tools.
//!
//! All three tools take the same leading positionals (timeout, host, port,
//! user, password) and differ only in the trailing argument. Numeric
//! positionals arrive as strings and are validated here so that every
//! argument problem exits with the `invalid argument` code and the usage
//! text, while clap's own `-h` handling still exits zero.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::control::{ControlSession, ControlTarget};
use crate::protocol::{Command, Response, ResponseStatus};
use crate::{Error, ErrorCode, Result};

/// Positional arguments shared by every control tool.
#[derive(Debug, clap::Args)]
pub struct TargetArgs {
    /// Seconds to wait for each network operation (0 disables the limit)
    pub timeout: String,
    /// Hostname of the proxy's control listener
    pub host: String,
    /// Port of the control listener
    pub port: String,
    /// Operator user name
    pub user: String,
    /// Operator password
    pub password: String,
}

impl TargetArgs {
    /// Validate the shared positionals into a [`ControlTarget`]. Purely
    /// local; no network I/O can happen until this succeeds.
    pub fn to_target(&self) -> Result<ControlTarget> {
        let timeout = parse_int(&self.timeout, "timeout")?;
        let port = parse_int(&self.port, "port")?;
        ControlTarget::new(&self.host, port, &self.user, &self.password, timeout)
    }
}

/// Strict decimal parse; rejects everything `i64::from_str` rejects,
/// including trailing junk and embedded spaces.
pub fn parse_int(value: &str, what: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|_| {
        Error::InvalidArgument(format!("{what} must be an integer, got '{value}'"))
    })
}

/// Parse arguments or exit: `-h` exits 0, any parse problem exits with the
/// `invalid argument` code after clap printed the error and usage.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(i32::from(ErrorCode::InvalidArgument as u8));
        }
    }
}

/// Print the failure and exit with its mapped code. Usage is shown only
/// for argument problems.
pub fn fail<T: CommandFactory>(err: &Error) -> ! {
    eprintln!("error: {err}");
    if matches!(err, Error::InvalidArgument(_)) {
        let mut cmd = T::command();
        eprintln!("{}", cmd.render_usage());
    }
    std::process::exit(i32::from(err.exit_code()));
}

/// Install the fmt subscriber. `-d` forces debug level; otherwise the
/// usual `RUST_LOG` filtering applies.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Drive exactly one command through one session: connect, send, take the
/// reply, disconnect. A non-Ok reply status becomes the matching local
/// error so the process exits with the code the listener reported.
pub async fn run_command(target: &ControlTarget, command: Command) -> Result<Response> {
    let mut session = ControlSession::connect(target).await?;

    let reply = match session.send(&command).await {
        Ok(pending) => pending.receive().await,
        Err(e) => Err(e),
    };
    session.disconnect().await;

    let response = reply?;
    if let ResponseStatus::Err(code) = response.status {
        let message = response
            .message
            .unwrap_or_else(|| code.as_str().to_string());
        return Err(error_from_code(code, message));
    }
    Ok(response)
}

fn error_from_code(code: ErrorCode, message: String) -> Error {
    match code {
        ErrorCode::InvalidArgument => Error::InvalidArgument(message),
        ErrorCode::Unreachable => Error::Unreachable(message),
        ErrorCode::Timeout => Error::Timeout(message),
        ErrorCode::AuthFailed => Error::AuthFailed(message),
        ErrorCode::Protocol => Error::Protocol(message),
        ErrorCode::Handshake => Error::Handshake(message),
        ErrorCode::Io => Error::Io(std::io::Error::other(message)),
        ErrorCode::Unsupported => Error::Unsupported(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(timeout: &str, port: &str) -> TargetArgs {
        TargetArgs {
            timeout: timeout.to_string(),
            host: "localhost".to_string(),
            port: port.to_string(),
            user: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn test_parse_int_strictness() {
        assert_eq!(parse_int("42", "x").unwrap(), 42);
        assert_eq!(parse_int("-3", "x").unwrap(), -3);
        assert!(parse_int("42x", "x").is_err());
        assert!(parse_int(" 42", "x").is_err());
        assert!(parse_int("", "x").is_err());
        assert!(parse_int("4.2", "x").is_err());
    }

    #[test]
    fn test_target_args_validate_before_io() {
        assert!(args("10", "9898").to_target().is_ok());

        let err = args("ten", "9898").to_target().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = args("10", "notaport").to_target().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = args("10", "80").to_target().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_remote_codes_map_to_matching_local_errors() {
        for code in ErrorCode::ALL {
            let err = error_from_code(code, "remote detail".to_string());
            assert_eq!(err.code(), code, "code {code} did not survive the mapping");
        }
    }

    #[tokio::test]
    async fn test_run_command_against_closed_port() {
        // Grab a port the OS considers free, then close it again.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target =
            ControlTarget::new("127.0.0.1", i64::from(port), "admin", "pw", 5).unwrap();
        let command = Command::shutdown(crate::protocol::ShutdownMode::Smart);

        let err = run_command(&target, command).await.unwrap_err();
        assert!(matches!(err, Error::Unreachable(_)));
        assert_eq!(err.exit_code(), 2);
    }
}

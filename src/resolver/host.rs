use tracing::{debug, warn};

use crate::process::{CommandRunner, Invocation};

/// What the installed system compiler reports about itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostInfo {
    pub gcc_major: Option<u32>,
    pub triple: Option<String>,
}

/// Major version from `gcc -dumpversion`, which prints either `7` or `7.3.0`.
pub fn parse_major(output: &str) -> Option<u32> {
    output.trim().split('.').next()?.parse().ok()
}

async fn query(runner: &dyn CommandRunner, flag: &str) -> Option<String> {
    let invocation = Invocation::new("gcc").arg(flag);

    match runner.output(&invocation).await {
        Ok((exit, stdout)) if exit.success() => {
            let line = stdout.trim().to_string();
            debug!("gcc {}: {}", flag, line);
            Some(line).filter(|l| !l.is_empty())
        }
        Ok((exit, _)) => {
            warn!("gcc {} exited with {}", flag, exit);
            None
        }
        Err(err) => {
            warn!("failed to run gcc {}: {}", flag, err);
            None
        }
    }
}

pub async fn detect(runner: &dyn CommandRunner) -> HostInfo {
    let gcc_major = query(runner, "-dumpversion")
        .await
        .and_then(|out| parse_major(&out));

    let triple = query(runner, "-dumpmachine").await;

    HostInfo { gcc_major, triple }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;

    #[test]
    fn parses_both_dumpversion_styles() {
        assert_eq!(parse_major("7\n"), Some(7));
        assert_eq!(parse_major("8.2.0"), Some(8));
        assert_eq!(parse_major("gcc"), None);
        assert_eq!(parse_major(""), None);
    }

    #[tokio::test]
    async fn detect_reads_version_and_machine() {
        let runner = RecordingRunner::default()
            .with_stdout("gcc -dumpversion", "7.3.0\n")
            .with_stdout("gcc -dumpmachine", "x86_64-pc-linux-gnu\n");

        let host = detect(&runner).await;

        assert_eq!(host.gcc_major, Some(7));
        assert_eq!(host.triple.as_deref(), Some("x86_64-pc-linux-gnu"));
    }

    #[tokio::test]
    async fn detect_tolerates_missing_compiler() {
        let runner = RecordingRunner::default().fail_on("gcc", 127);

        assert_eq!(detect(&runner).await, HostInfo::default());
    }
}

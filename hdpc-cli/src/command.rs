//! Commands accepted by the interactive shell
use clap::{Parser, Subcommand, ValueEnum};
use hdpc_supervisor::{DriveMode, Event};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ShellCommand {
    /// Enable the motors and start driving
    Start,
    /// Disable the motors
    Stop,
    /// Re-initialize the fleet from Stop or Fault
    Reset,
    /// Emergency stop
    Estop,
    /// Print the supervisor state and the latest device readings
    Info,
    /// Select which state Start leads to
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Set the drive velocities in rad/s, one per device in config order
    Velocity {
        #[arg(allow_negative_numbers = true, num_args = 1..)]
        values: Vec<f64>,
    },
    /// Terminate the supervisor and exit
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Normal,
    TestDriving,
    TestSteering,
}

impl From<ModeArg> for DriveMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Normal => DriveMode::Normal,
            ModeArg::TestDriving => DriveMode::TestDrivingMotor,
            ModeArg::TestSteering => DriveMode::TestSteeringMotor,
        }
    }
}

impl ShellCommand {
    /// The supervisor event this command raises, if it maps directly to one
    pub fn event(&self) -> Option<Event> {
        match self {
            ShellCommand::Start => Some(Event::Starting),
            ShellCommand::Stop => Some(Event::Stopping),
            ShellCommand::Reset => Some(Event::Reseting),
            ShellCommand::Estop => Some(Event::EmergencyStop),
            ShellCommand::Info => Some(Event::StateInfo),
            ShellCommand::Quit => Some(Event::TerminateSM),
            ShellCommand::Mode { .. } | ShellCommand::Velocity { .. } => None,
        }
    }
}

/// Split and parse one line of shell input
///
/// Returns Ok(None) for a blank line, and the rendered clap error (including help output) on
/// failure.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let Some(args) = shlex::split(line) else {
        return Err("Unbalanced quotes".to_string());
    };
    if args.is_empty() {
        return Ok(None);
    }
    ShellLine::try_parse_from(args)
        .map(|l| Some(l.command))
        .map_err(|e| e.render().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Ok(None), parse_line("   "));
        assert_eq!(Ok(Some(ShellCommand::Start)), parse_line("start"));
        assert_eq!(
            Ok(Some(ShellCommand::Mode {
                mode: ModeArg::TestSteering
            })),
            parse_line("mode test-steering")
        );
        assert_eq!(
            Ok(Some(ShellCommand::Velocity {
                values: vec![1.5, -0.25]
            })),
            parse_line("velocity 1.5 -0.25")
        );
        assert_eq!(
            Some(Event::EmergencyStop),
            parse_line("estop").unwrap().unwrap().event()
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_line("launch").unwrap_err();
        assert_contains!(err, "launch");
        assert!(parse_line("velocity").is_err());
        assert!(parse_line("mode \"normal").is_err());
    }
}

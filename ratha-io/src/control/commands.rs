//! Events coming from the operator front-end

use crate::error::{Error, Result};
use crate::vehicle::Direction;
use std::fmt;
use std::str::FromStr;

/// Non-motion commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SpeedUp,
    SpeedDown,
    TurnRateUp,
    TurnRateDown,
    Stop,
    Brake,
    Exit,
}

impl ControlCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::SpeedUp => "speed+",
            ControlCommand::SpeedDown => "speed-",
            ControlCommand::TurnRateUp => "turn_rate+",
            ControlCommand::TurnRateDown => "turn_rate-",
            ControlCommand::Stop => "stop",
            ControlCommand::Brake => "brake",
            ControlCommand::Exit => "exit",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        // '-' was folded into '_' above, so "speed-" arrives as "speed_"
        let command = match token.as_str() {
            "speed+" | "speed_up" => ControlCommand::SpeedUp,
            "speed_" | "speed_down" => ControlCommand::SpeedDown,
            "turn_rate+" | "turn+" | "turn_rate_up" => ControlCommand::TurnRateUp,
            "turn_rate_" | "turn_" | "turn_rate_down" => ControlCommand::TurnRateDown,
            "stop" => ControlCommand::Stop,
            "brake" => ControlCommand::Brake,
            "exit" | "quit" => ControlCommand::Exit,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown command '{}'",
                    s.trim()
                )));
            }
        };
        Ok(command)
    }
}

/// One tagged event for [`super::CarController::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Command(ControlCommand),
    Direction(Direction),
}

impl ControlEvent {
    /// Build an event from a `(tag, value)` pair such as
    /// `("direction", "fwd_right")` or `("command", "speed+")`
    pub fn from_tagged(tag: &str, value: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "command" | "cmd" => value.parse().map(ControlEvent::Command),
            "direction" | "dir" => value.parse().map(ControlEvent::Direction),
            other => Err(Error::InvalidArgument(format!(
                "unknown event tag '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::Command(c) => write!(f, "command {c}"),
            ControlEvent::Direction(d) => write!(f, "direction {d}"),
        }
    }
}

/// Single token: commands win over directions (`stop`, `brake`)
impl FromStr for ControlEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(command) = s.parse::<ControlCommand>() {
            return Ok(ControlEvent::Command(command));
        }
        s.parse::<Direction>()
            .map(ControlEvent::Direction)
            .map_err(|_| Error::InvalidArgument(format!("unknown event '{}'", s.trim())))
    }
}

/// Whether the session should go on after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens() {
        assert_eq!("speed+".parse::<ControlCommand>().unwrap(), ControlCommand::SpeedUp);
        assert_eq!("speed-".parse::<ControlCommand>().unwrap(), ControlCommand::SpeedDown);
        assert_eq!(
            "turn_rate-".parse::<ControlCommand>().unwrap(),
            ControlCommand::TurnRateDown
        );
        assert_eq!("QUIT".parse::<ControlCommand>().unwrap(), ControlCommand::Exit);
        for c in [
            ControlCommand::SpeedUp,
            ControlCommand::SpeedDown,
            ControlCommand::TurnRateUp,
            ControlCommand::TurnRateDown,
            ControlCommand::Stop,
            ControlCommand::Brake,
            ControlCommand::Exit,
        ] {
            assert_eq!(c.as_str().parse::<ControlCommand>().unwrap(), c);
        }
    }

    #[test]
    fn test_single_token_events() {
        assert_eq!(
            "stop".parse::<ControlEvent>().unwrap(),
            ControlEvent::Command(ControlCommand::Stop)
        );
        assert_eq!(
            "fwd_right".parse::<ControlEvent>().unwrap(),
            ControlEvent::Direction(Direction::ForwardRight)
        );
        assert!(matches!(
            "jump".parse::<ControlEvent>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tagged_events() {
        assert_eq!(
            ControlEvent::from_tagged("direction", "stop").unwrap(),
            ControlEvent::Direction(Direction::Stop)
        );
        assert_eq!(
            ControlEvent::from_tagged("Command", "exit").unwrap(),
            ControlEvent::Command(ControlCommand::Exit)
        );
        assert!(matches!(
            ControlEvent::from_tagged("gesture", "wave"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ControlEvent::from_tagged("command", "forward"),
            Err(Error::InvalidArgument(_))
        ));
    }
}

//! User-facing gate actions and their topics

use super::messages::{CommandPayload, OutboundCommand};
use super::topics::{NotificationTopic, PublishTopic};
use std::fmt;
use std::str::FromStr;

/// Something a user can trigger on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateAction {
    /// Main gate ("cancello")
    Gate,
    /// Pedestrian opening of the main gate ("pedonabile")
    Partial,
    /// Small gate ("cancellino")
    SmallGate,
    /// Garage light
    GarageLight,
    /// Remote learning mode
    Learning,
}

impl GateAction {
    pub const ALL: [GateAction; 5] = [
        GateAction::Gate,
        GateAction::Partial,
        GateAction::SmallGate,
        GateAction::GarageLight,
        GateAction::Learning,
    ];

    pub fn topic(&self) -> PublishTopic {
        match self {
            GateAction::Gate => PublishTopic::Gate,
            GateAction::Partial => PublishTopic::Partial,
            GateAction::SmallGate => PublishTopic::SmallGate,
            GateAction::GarageLight => PublishTopic::GarageLight,
            GateAction::Learning => PublishTopic::Learning,
        }
    }

    /// Notification topic the controller answers on
    pub fn acknowledgement_topic(&self) -> NotificationTopic {
        match self {
            GateAction::Gate => NotificationTopic::Gate,
            GateAction::Partial => NotificationTopic::Partial,
            GateAction::SmallGate => NotificationTopic::SmallGate,
            GateAction::GarageLight => NotificationTopic::GarageLight,
            GateAction::Learning => NotificationTopic::Learning,
        }
    }

    /// Build the outbound command, attributing it to `user` when set
    pub fn command(&self, user: Option<&str>) -> OutboundCommand {
        let payload = CommandPayload::from_user(user);
        match self {
            GateAction::Gate => OutboundCommand::Gate(payload),
            GateAction::Partial => OutboundCommand::Partial(payload),
            GateAction::SmallGate => OutboundCommand::SmallGate(payload),
            GateAction::GarageLight => OutboundCommand::GarageLight(payload),
            GateAction::Learning => OutboundCommand::Learning(payload),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GateAction::Gate => "gate",
            GateAction::Partial => "partial",
            GateAction::SmallGate => "small-gate",
            GateAction::GarageLight => "light",
            GateAction::Learning => "learning",
        }
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gate" | "cancello" => Ok(GateAction::Gate),
            "partial" | "pedonabile" => Ok(GateAction::Partial),
            "small-gate" | "small_gate" | "cancellino" => Ok(GateAction::SmallGate),
            "light" | "garage" => Ok(GateAction::GarageLight),
            "learning" => Ok(GateAction::Learning),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_map_to_matching_topics() {
        assert_eq!(GateAction::Gate.topic().as_str(), "api/gate");
        assert_eq!(GateAction::SmallGate.topic().as_str(), "api/small_gate");
        assert_eq!(
            GateAction::GarageLight.acknowledgement_topic().as_str(),
            "api/notification/garage/light"
        );

        for action in GateAction::ALL {
            assert_eq!(action.command(None).topic(), action.topic());
        }
    }

    #[test]
    fn test_command_carries_user() {
        let command = GateAction::Partial.command(Some("Giulia"));
        assert_eq!(command.encode().unwrap(), r#"{"cmd":"on","user":"Giulia"}"#);
    }

    #[test]
    fn test_parse_accepts_both_vocabularies() {
        assert_eq!("cancellino".parse::<GateAction>(), Ok(GateAction::SmallGate));
        assert_eq!("small-gate".parse::<GateAction>(), Ok(GateAction::SmallGate));
        assert_eq!("Garage".parse::<GateAction>(), Ok(GateAction::GarageLight));
        assert!("door".parse::<GateAction>().is_err());

        for action in GateAction::ALL {
            assert_eq!(action.name().parse::<GateAction>(), Ok(action));
        }
    }
}

use log::info;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Streaming,
    Disconnected,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 7] = [
        ConnectionState::Idle,
        ConnectionState::Scanning,
        ConnectionState::Connecting,
        ConnectionState::ServiceDiscovery,
        ConnectionState::Subscribing,
        ConnectionState::Streaming,
        ConnectionState::Disconnected,
    ];

    /// The only forward step allowed out of this state.
    pub fn next(self) -> Option<ConnectionState> {
        use ConnectionState::*;
        match self {
            Idle => Some(Scanning),
            Scanning => Some(Connecting),
            Connecting => Some(ServiceDiscovery),
            ServiceDiscovery => Some(Subscribing),
            Subscribing => Some(Streaming),
            Streaming | Disconnected => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Disconnected
    }

    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == ConnectionState::Disconnected || self.next() == Some(to)
    }
}

/// Tracks one source's connection and refuses out-of-order steps.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        ConnectionMachine {
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn advance(&mut self, to: ConnectionState) -> Result<(), SourceError> {
        if !self.state.can_transition_to(to) {
            return Err(SourceError::InvalidTransition { from: self.state, to });
        }
        info!("BLE connection: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Link loss, stop or failure. Idempotent.
    pub fn disconnect(&mut self) {
        if !self.state.is_terminal() {
            info!("BLE connection: {:?} -> Disconnected", self.state);
            self.state = ConnectionState::Disconnected;
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        ConnectionMachine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn idle_only_reaches_scanning() {
        for to in ConnectionState::ALL {
            let allowed = Idle.can_transition_to(to);
            assert_eq!(allowed, to == Scanning || to == Disconnected, "Idle -> {to:?}");
        }
    }

    #[test]
    fn disconnected_reachable_from_every_live_state() {
        for from in ConnectionState::ALL {
            if from.is_terminal() {
                continue;
            }
            assert!(from.can_transition_to(Disconnected), "{from:?} -> Disconnected");
        }
    }

    #[test]
    fn disconnected_is_terminal() {
        for to in ConnectionState::ALL {
            assert!(!Disconnected.can_transition_to(to));
        }

        let mut machine = ConnectionMachine::new();
        machine.disconnect();
        assert!(machine.advance(Scanning).is_err());
        machine.disconnect();
        assert_eq!(machine.state(), Disconnected);
    }

    #[test]
    fn streaming_requires_full_ordered_path() {
        let mut machine = ConnectionMachine::new();
        for to in [Scanning, Connecting, ServiceDiscovery, Subscribing, Streaming] {
            machine.advance(to).unwrap();
        }
        assert_eq!(machine.state(), Streaming);

        for from in ConnectionState::ALL {
            if from != Subscribing {
                assert!(!from.can_transition_to(Streaming), "{from:?} -> Streaming");
            }
        }
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        let mut machine = ConnectionMachine::new();
        machine.advance(Scanning).unwrap();

        let err = machine.advance(ServiceDiscovery).unwrap_err();
        assert!(matches!(
            err,
            SourceError::InvalidTransition {
                from: Scanning,
                to: ServiceDiscovery
            }
        ));
        assert_eq!(machine.state(), Scanning);
    }
}

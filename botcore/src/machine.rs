//! Connection state machine.
//!
//! The machine never touches a transport or a timer. The runtime feeds it
//! typed [`Input`]s and executes the [`Command`]s it hands back, in order.
//! Every session-scoped input carries the [`Generation`] of the session it
//! came from; inputs from a replaced session are dropped here, so a late
//! callback from a torn-down transport can never move the state.

use crate::disconnect::{CloseDisposition, DisconnectReason, classify_close};
use crate::events::LastDisconnect;
use log::debug;
use serde::Serialize;
use std::time::Duration;

/// Identifies one transport instance. Starts at 1; 0 means "no session".
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Bootstrapping,
    AwaitingPairing,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// First bootstrap of the process.
    Start,
    /// The single pending reconnect timer fired.
    ReconnectDue,
    SessionCreated {
        generation: Generation,
        registered: bool,
    },
    /// Building the transport failed before any session existed.
    BootstrapFailed { error: String },
    ConnectionOpened { generation: Generation },
    ConnectionClosed {
        generation: Generation,
        last_disconnect: Option<LastDisconnect>,
    },
    PairingSucceeded { generation: Generation },
    PairingExhausted {
        generation: Generation,
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateSession { generation: Generation },
    StartPairing { generation: Generation },
    /// Cancel a pairing sequence that is still waiting or retrying.
    StopPairing,
    ResetPairingAttempts,
    /// One-shot work after a connection opens; failures are not fatal.
    PrimeStatusSubscription { generation: Generation },
    StartMaintenance { generation: Generation },
    StopMaintenance,
    /// Forget the session handle. `end_transport` asks the transport to shut
    /// itself down, for cases where it has not closed on its own.
    ReleaseSession {
        generation: Generation,
        end_transport: bool,
    },
    ScheduleReconnect { delay: Duration },
    Terminate { reason: DisconnectReason },
}

/// Next state plus the side effects the runtime has to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: ConnectionState,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    generation: Generation,
    reconnect_pending: bool,
    reconnect_delay: Duration,
    terminated: bool,
}

impl ConnectionMachine {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            reconnect_pending: false,
            reconnect_delay,
            terminated: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn handle(&mut self, input: Input) -> Step {
        let commands = if self.terminated {
            debug!(target: "Supervisor/Machine", "Ignoring {input:?}: session terminated");
            Vec::new()
        } else {
            self.transition(input)
        };
        Step {
            state: self.state,
            commands,
        }
    }

    fn transition(&mut self, input: Input) -> Vec<Command> {
        use ConnectionState::*;

        match input {
            Input::Start if self.state == Idle && !self.reconnect_pending => self.bootstrap(),
            Input::ReconnectDue if self.reconnect_pending => {
                self.reconnect_pending = false;
                if matches!(self.state, Idle | Closing) {
                    self.bootstrap()
                } else {
                    Vec::new()
                }
            }
            Input::SessionCreated {
                generation,
                registered,
            } if self.is_current(generation) && self.state == Bootstrapping => {
                if registered {
                    Vec::new()
                } else {
                    self.state = AwaitingPairing;
                    vec![Command::StartPairing { generation }]
                }
            }
            Input::BootstrapFailed { error } if self.state == Bootstrapping => {
                debug!(target: "Supervisor/Machine", "Bootstrap failed: {error}");
                self.state = Closing;
                self.schedule_reconnect().into_iter().collect()
            }
            Input::ConnectionOpened { generation }
                if self.is_current(generation)
                    && matches!(self.state, Bootstrapping | AwaitingPairing) =>
            {
                let mut commands = Vec::with_capacity(4);
                if self.state == AwaitingPairing {
                    commands.push(Command::StopPairing);
                }
                self.state = Open;
                commands.extend([
                    Command::ResetPairingAttempts,
                    Command::PrimeStatusSubscription { generation },
                    Command::StartMaintenance { generation },
                ]);
                commands
            }
            Input::ConnectionClosed {
                generation,
                last_disconnect,
            } if self.is_current(generation)
                && matches!(self.state, Bootstrapping | AwaitingPairing | Open) =>
            {
                self.state = Closing;
                let mut commands = vec![
                    Command::StopMaintenance,
                    Command::ReleaseSession {
                        generation,
                        end_transport: false,
                    },
                ];
                match classify_close(last_disconnect.as_ref()) {
                    CloseDisposition::Terminate { reason } => {
                        self.terminated = true;
                        commands.push(Command::Terminate { reason });
                    }
                    CloseDisposition::Reconnect { .. } => {
                        commands.extend(self.schedule_reconnect());
                    }
                }
                commands
            }
            Input::PairingSucceeded { generation }
                if self.is_current(generation) && self.state == AwaitingPairing =>
            {
                // The code is on screen; the transport opens once the phone confirms.
                Vec::new()
            }
            Input::PairingExhausted {
                generation,
                attempts,
            } if self.is_current(generation) && self.state == AwaitingPairing => {
                debug!(
                    target: "Supervisor/Machine",
                    "Pairing exhausted after {attempts} attempts, recycling session"
                );
                self.state = Closing;
                let mut commands = vec![
                    Command::StopMaintenance,
                    Command::ReleaseSession {
                        generation,
                        end_transport: true,
                    },
                ];
                commands.extend(self.schedule_reconnect());
                commands
            }
            other => {
                debug!(
                    target: "Supervisor/Machine",
                    "Ignoring {other:?} in state {:?} (gen={})",
                    self.state,
                    self.generation
                );
                Vec::new()
            }
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        generation != 0 && generation == self.generation
    }

    fn bootstrap(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Bootstrapping;
        self.generation += 1;
        vec![Command::CreateSession {
            generation: self.generation,
        }]
    }

    fn schedule_reconnect(&mut self) -> Option<Command> {
        if self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = true;
        Some(Command::ScheduleReconnect {
            delay: self.reconnect_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(5_000);

    fn closed(code: Option<u16>) -> Option<LastDisconnect> {
        Some(LastDisconnect {
            error: None,
            status_code: code,
        })
    }

    fn open_machine() -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(DELAY);
        machine.handle(Input::Start);
        machine.handle(Input::SessionCreated {
            generation: 1,
            registered: true,
        });
        machine.handle(Input::ConnectionOpened { generation: 1 });
        assert_eq!(machine.state(), ConnectionState::Open);
        machine
    }

    fn reconnects(commands: &[Command]) -> usize {
        commands
            .iter()
            .filter(|c| matches!(c, Command::ScheduleReconnect { .. }))
            .count()
    }

    #[test]
    fn start_creates_first_session() {
        let mut machine = ConnectionMachine::new(DELAY);
        let step = machine.handle(Input::Start);
        assert_eq!(step.state, ConnectionState::Bootstrapping);
        assert_eq!(step.commands, vec![Command::CreateSession { generation: 1 }]);

        // A second start while bootstrapping does nothing.
        assert!(machine.handle(Input::Start).commands.is_empty());
    }

    #[test]
    fn unregistered_session_awaits_pairing() {
        let mut machine = ConnectionMachine::new(DELAY);
        machine.handle(Input::Start);
        let step = machine.handle(Input::SessionCreated {
            generation: 1,
            registered: false,
        });
        assert_eq!(step.state, ConnectionState::AwaitingPairing);
        assert_eq!(step.commands, vec![Command::StartPairing { generation: 1 }]);

        let step = machine.handle(Input::PairingSucceeded { generation: 1 });
        assert_eq!(step.state, ConnectionState::AwaitingPairing);
        assert!(step.commands.is_empty());

        let step = machine.handle(Input::ConnectionOpened { generation: 1 });
        assert_eq!(step.state, ConnectionState::Open);
        assert_eq!(
            step.commands,
            vec![
                Command::StopPairing,
                Command::ResetPairingAttempts,
                Command::PrimeStatusSubscription { generation: 1 },
                Command::StartMaintenance { generation: 1 },
            ]
        );
    }

    #[test]
    fn open_resets_primes_and_starts_maintenance() {
        let mut machine = ConnectionMachine::new(DELAY);
        machine.handle(Input::Start);
        machine.handle(Input::SessionCreated {
            generation: 1,
            registered: true,
        });
        let step = machine.handle(Input::ConnectionOpened { generation: 1 });
        assert_eq!(
            step.commands,
            vec![
                Command::ResetPairingAttempts,
                Command::PrimeStatusSubscription { generation: 1 },
                Command::StartMaintenance { generation: 1 },
            ]
        );

        // Duplicate open is ignored.
        assert!(
            machine
                .handle(Input::ConnectionOpened { generation: 1 })
                .commands
                .is_empty()
        );
    }

    #[test]
    fn logged_out_close_never_schedules_bootstrap() {
        let mut machine = open_machine();
        let step = machine.handle(Input::ConnectionClosed {
            generation: 1,
            last_disconnect: closed(Some(401)),
        });
        assert_eq!(
            step.commands,
            vec![
                Command::StopMaintenance,
                Command::ReleaseSession {
                    generation: 1,
                    end_transport: false
                },
                Command::Terminate {
                    reason: DisconnectReason::LoggedOut
                },
            ]
        );
        assert!(machine.is_terminated());
        assert!(!machine.reconnect_pending());
        assert!(machine.handle(Input::ReconnectDue).commands.is_empty());
        assert!(machine.handle(Input::Start).commands.is_empty());
    }

    #[test]
    fn recoverable_close_schedules_exactly_one_bootstrap() {
        for last_disconnect in [closed(Some(428)), closed(Some(515)), closed(None), None] {
            let mut machine = open_machine();
            let step = machine.handle(Input::ConnectionClosed {
                generation: 1,
                last_disconnect,
            });
            assert_eq!(step.state, ConnectionState::Closing);
            assert_eq!(step.commands[0], Command::StopMaintenance);
            assert_eq!(reconnects(&step.commands), 1);
            assert_eq!(
                step.commands.last(),
                Some(&Command::ScheduleReconnect { delay: DELAY })
            );

            // A duplicate close for the same session schedules nothing more.
            let step = machine.handle(Input::ConnectionClosed {
                generation: 1,
                last_disconnect: None,
            });
            assert!(step.commands.is_empty());

            let step = machine.handle(Input::ReconnectDue);
            assert_eq!(step.state, ConnectionState::Bootstrapping);
            assert_eq!(step.commands, vec![Command::CreateSession { generation: 2 }]);
        }
    }

    #[test]
    fn stale_generation_inputs_are_ignored() {
        let mut machine = open_machine();
        machine.handle(Input::ConnectionClosed {
            generation: 1,
            last_disconnect: None,
        });
        machine.handle(Input::ReconnectDue);
        machine.handle(Input::SessionCreated {
            generation: 2,
            registered: true,
        });

        let step = machine.handle(Input::ConnectionOpened { generation: 1 });
        assert_eq!(step.state, ConnectionState::Bootstrapping);
        assert!(step.commands.is_empty());

        let step = machine.handle(Input::ConnectionClosed {
            generation: 1,
            last_disconnect: closed(Some(401)),
        });
        assert!(step.commands.is_empty());
        assert!(!machine.is_terminated());
    }

    #[test]
    fn bootstrap_failure_always_leaves_a_retry_pending() {
        let mut machine = ConnectionMachine::new(DELAY);
        machine.handle(Input::Start);
        let step = machine.handle(Input::BootstrapFailed {
            error: "socket refused".to_string(),
        });
        assert_eq!(step.state, ConnectionState::Closing);
        assert_eq!(step.commands, vec![Command::ScheduleReconnect { delay: DELAY }]);
        assert!(machine.reconnect_pending());

        let step = machine.handle(Input::ReconnectDue);
        assert_eq!(step.commands, vec![Command::CreateSession { generation: 2 }]);
        assert!(!machine.reconnect_pending());
    }

    #[test]
    fn pairing_exhaustion_recycles_the_whole_session() {
        let mut machine = ConnectionMachine::new(DELAY);
        machine.handle(Input::Start);
        machine.handle(Input::SessionCreated {
            generation: 1,
            registered: false,
        });
        let step = machine.handle(Input::PairingExhausted {
            generation: 1,
            attempts: 5,
        });
        assert_eq!(step.state, ConnectionState::Closing);
        assert_eq!(
            step.commands,
            vec![
                Command::StopMaintenance,
                Command::ReleaseSession {
                    generation: 1,
                    end_transport: true
                },
                Command::ScheduleReconnect { delay: DELAY },
            ]
        );
        assert!(!machine.is_terminated());

        // The ended transport's own close notification is a no-op.
        let step = machine.handle(Input::ConnectionClosed {
            generation: 1,
            last_disconnect: None,
        });
        assert!(step.commands.is_empty());
    }

    #[test]
    fn reconnect_due_without_pending_timer_is_ignored() {
        let mut machine = open_machine();
        let step = machine.handle(Input::ReconnectDue);
        assert_eq!(step.state, ConnectionState::Open);
        assert!(step.commands.is_empty());
    }
}

//! Slave-side EtherCAT State Machine (spec §4.4).
//!
//! A [`StateMachine`] drives one [`crate::esc::EscDevice`] through
//! INIT/PRE_OP/SAFE_OP/OPERATIONAL, reading `AL_CONTROL`/`WDOG_STATUS` and
//! writing `AL_STATUS_CODE`/`AL_STATUS` each [`StateMachine::play`] call.
//! BOOT is always rejected (`BootstrapNotSupported`); this crate doesn't
//! implement the bootstrap mailbox protocol.
//!
//! Grounded in `lib/slave/include/kickcat/ESM.h` + `lib/slave/src/ESM.cc`
//! (`StateMachine::play`, the common `routine` guard) and
//! `lib/slave/include/kickcat/ESMStates.h` + `lib/slave/src/ESMStates.cc`
//! (per-state `routine_internal`/`on_entry`) — `original_source/`. Styled
//! after `src/slave_state.rs` (teacher, catch-all `Other(u8)` + `Display`).

use crate::al_status_code::AlStatusCode;
use crate::esc::{EscDevice, SyncManagerConfig};
use crate::error::Error;
use crate::mailbox::response::DeviceState;
use crate::register::RegisterAddress;

const MASK_STATE: u16 = 0x0f;
const ERROR_ACK: u16 = 0x10;

/// One of the four reachable EtherCAT device states, or the always-rejected
/// `Boot` bootstrap state. `Other` carries any unrecognised nibble so a
/// corrupted `AL_CONTROL` read doesn't panic the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    PreOp,
    Boot,
    SafeOp,
    Operational,
    Other(u8),
}

impl State {
    /// Decode the low nibble of an `AL_CONTROL`/`AL_STATUS` value, also
    /// used by `bus` to interpret a polled `AL_STATUS` register.
    pub fn from_nibble(value: u8) -> Self {
        match value & MASK_STATE as u8 {
            0x01 => Self::Init,
            0x02 => Self::PreOp,
            0x03 => Self::Boot,
            0x04 => Self::SafeOp,
            0x08 => Self::Operational,
            other => Self::Other(other),
        }
    }

    /// The value `bus` writes to `AL_CONTROL` to request this state.
    pub fn nibble(self) -> u8 {
        match self {
            Self::Init => 0x01,
            Self::PreOp => 0x02,
            Self::Boot => 0x03,
            Self::SafeOp => 0x04,
            Self::Operational => 0x08,
            Self::Other(other) => other,
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::PreOp => f.write_str("PRE_OP"),
            Self::Boot => f.write_str("BOOT"),
            Self::SafeOp => f.write_str("SAFE_OP"),
            Self::Operational => f.write_str("OPERATIONAL"),
            Self::Other(value) => write!(f, "UNKNOWN({value:#04x})"),
        }
    }
}

/// Lets the mailbox responder gate access without depending on this module;
/// BOOT and unrecognised states fall back to `PreOp`, the most permissive
/// of the three access tiers `DeviceState` models.
impl From<State> for DeviceState {
    fn from(state: State) -> Self {
        match state {
            State::SafeOp => DeviceState::SafeOp,
            State::Operational => DeviceState::Op,
            State::Init | State::PreOp | State::Boot | State::Other(_) => DeviceState::PreOp,
        }
    }
}

/// Value read from `AL_CONTROL`: a requested state plus the `ERROR_ACK` bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AlControl {
    pub value: u16,
}

impl AlControl {
    pub fn requested_state(self) -> State {
        State::from_nibble(self.value as u8)
    }

    fn error_ack(self) -> bool {
        self.value & ERROR_ACK != 0
    }
}

/// The state machine's full status: what gets written to `AL_STATUS`/
/// `AL_STATUS_CODE`, plus the watchdog snapshot and output-data-valid latch
/// carried between `play()` calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Context {
    pub al_status: u16,
    pub al_status_code: u16,
    pub al_watchdog_process_data: u16,
    pub valid_output_data: bool,
}

impl Context {
    pub fn state(self) -> State {
        State::from_nibble(self.al_status as u8)
    }

    pub fn error_ack_pending(self) -> bool {
        self.al_status & ERROR_ACK != 0
    }

    /// Watchdog process data bit 0 low means the watchdog has expired.
    pub fn watchdog_expired(self) -> bool {
        self.al_watchdog_process_data & 0x1 == 0
    }

    /// Build a successful transition into `state`.
    pub fn ok(self, state: State) -> Self {
        Self { al_status: state.nibble() as u16, al_status_code: AlStatusCode::NoError.code(), ..self }
    }

    /// Build a transition that reports `code` and latches `ERROR_ACK`, per
    /// `Context::build`'s non-`NO_ERROR` branch.
    pub fn error(self, state: State, code: AlStatusCode) -> Self {
        Self { al_status: state.nibble() as u16 | ERROR_ACK, al_status_code: code.code(), ..self }
    }

}

/// Common transition guard shared by every state (`AbstractState::routine`):
/// latches `ERROR_ACK` until the master either requests `INIT` or
/// acknowledges it, and rejects any request for a state not in
/// {BOOT, INIT, PRE_OP, SAFE_OP, OPERATIONAL} while not already OPERATIONAL.
fn common_routine(context: Context, control: AlControl, id: State) -> Option<Context> {
    if context.error_ack_pending() && !control.error_ack() {
        return Some(if control.requested_state() == State::Init { context.ok(State::Init) } else { context });
    }

    let requested = control.requested_state();
    let known = matches!(requested, State::Boot | State::Init | State::PreOp | State::SafeOp | State::Operational);
    if context.state() != State::Operational && !known {
        return Some(context.error(id, AlStatusCode::UnknownRequestedState));
    }

    None
}

/// Per-state transition logic, grounded on `ESMStates.cc`'s four
/// `routine_internal` overrides.
fn routine_internal<E: EscDevice>(
    state: State,
    esc: &mut E,
    mailbox_sms: &[SyncManagerConfig],
    pdo_sms: &[SyncManagerConfig],
    context: Context,
    control: AlControl,
) -> Result<Context, Error> {
    match state {
        State::Init => {
            if control.requested_state() == State::PreOp {
                if mailbox_sms.is_empty() {
                    return Ok(context.ok(State::PreOp));
                }
                let configured = mailbox_sms.iter().try_fold(true, |ok, sm| {
                    Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
                })?;
                return Ok(if configured {
                    context.ok(State::PreOp)
                } else {
                    context.error(State::Init, AlStatusCode::InvalidMailboxConfiguration2)
                });
            }

            if matches!(control.requested_state(), State::SafeOp | State::Operational) {
                return Ok(context.error(State::Init, AlStatusCode::InvalidRequestedStateChange));
            }

            if control.requested_state() == State::Boot {
                return Ok(context.error(State::Init, AlStatusCode::BootstrapNotSupported));
            }

            Ok(context.ok(State::Init))
        }

        State::PreOp => {
            let mailbox_ok = mailbox_sms.iter().try_fold(true, |ok, sm| {
                Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
            })?;
            if !mailbox_ok {
                return Ok(context.error(State::Init, AlStatusCode::InvalidMailboxConfiguration2));
            }

            if control.requested_state() == State::SafeOp {
                esc.set_sm_activate(pdo_sms, true)?;
                let pdo_ok = pdo_sms.iter().try_fold(true, |ok, sm| {
                    Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
                })?;
                return Ok(if pdo_ok {
                    context.ok(State::SafeOp)
                } else {
                    context.error(State::PreOp, AlStatusCode::InvalidSyncManagerConfiguration)
                });
            }

            if control.requested_state() == State::Init {
                return Ok(context.ok(State::Init));
            }

            if matches!(control.requested_state(), State::Operational | State::Boot) {
                return Ok(context.error(State::PreOp, AlStatusCode::InvalidRequestedStateChange));
            }

            Ok(context.ok(State::PreOp))
        }

        State::SafeOp => {
            let mailbox_ok = mailbox_sms.iter().try_fold(true, |ok, sm| {
                Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
            })?;
            if !mailbox_ok {
                return Ok(context.error(State::Init, AlStatusCode::InvalidMailboxConfiguration2));
            }

            let pdo_ok = pdo_sms.iter().try_fold(true, |ok, sm| {
                Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
            })?;
            if !pdo_ok {
                return Ok(context.error(State::PreOp, AlStatusCode::InvalidSyncManagerConfiguration));
            }

            if control.requested_state() == State::Operational && context.valid_output_data {
                return Ok(context.ok(State::Operational));
            }

            if matches!(control.requested_state(), State::PreOp | State::Init) {
                return Ok(context.ok(control.requested_state()));
            }

            if control.requested_state() == State::Boot {
                return Ok(context.error(State::SafeOp, AlStatusCode::InvalidRequestedStateChange));
            }

            Ok(context.ok(State::SafeOp))
        }

        State::Operational => {
            if context.watchdog_expired() {
                return Ok(context.error(State::SafeOp, AlStatusCode::SyncManagerWatchdog));
            }

            let mailbox_ok = mailbox_sms.iter().try_fold(true, |ok, sm| {
                Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
            })?;
            if !mailbox_ok {
                return Ok(context.error(State::Init, AlStatusCode::InvalidMailboxConfiguration2));
            }

            let pdo_ok = pdo_sms.iter().try_fold(true, |ok, sm| {
                Ok::<_, Error>(ok && esc.is_valid_sm(sm)?)
            })?;
            if !pdo_ok {
                return Ok(context.error(State::PreOp, AlStatusCode::InvalidSyncManagerConfiguration));
            }

            if control.requested_state() == State::Boot {
                return Ok(context.error(State::SafeOp, AlStatusCode::InvalidRequestedStateChange));
            }

            if matches!(control.requested_state(), State::PreOp | State::Init | State::SafeOp) {
                return Ok(context.ok(control.requested_state()));
            }

            let known = matches!(
                control.requested_state(),
                State::Boot | State::Init | State::PreOp | State::SafeOp | State::Operational
            );
            if !known {
                return Ok(context.error(State::SafeOp, AlStatusCode::UnknownRequestedState));
            }

            Ok(context.ok(control.requested_state()))
        }

        State::Boot | State::Other(_) => Ok(context.error(State::Init, AlStatusCode::BootstrapNotSupported)),
    }
}

/// Drives one slave device through the EtherCAT state machine, one
/// [`StateMachine::play`] call per cooperative scheduling tick.
pub struct StateMachine<E> {
    esc: E,
    mailbox_sms: Vec<SyncManagerConfig>,
    pdo_sms: Vec<SyncManagerConfig>,
    status: Context,
    current: State,
}

impl<E: EscDevice> StateMachine<E> {
    pub fn new(esc: E, mailbox_sms: Vec<SyncManagerConfig>, pdo_sms: Vec<SyncManagerConfig>) -> Self {
        Self {
            esc,
            mailbox_sms,
            pdo_sms,
            status: Context { al_status: State::Init.nibble() as u16, al_status_code: 0, al_watchdog_process_data: 1, valid_output_data: false },
            current: State::Init,
        }
    }

    pub fn state(&self) -> State {
        self.current
    }

    pub fn device_state(&self) -> DeviceState {
        self.current.into()
    }

    /// Direct access to the underlying ESC, for the mailbox/PDO I/O that
    /// `slave::Device` drives alongside `play()` each cycle.
    pub fn esc_mut(&mut self) -> &mut E {
        &mut self.esc
    }

    /// Mark process data outputs as having been written at least once,
    /// unlocking the SAFE_OP to OPERATIONAL transition.
    pub fn set_output_data_valid(&mut self, valid: bool) {
        self.status.valid_output_data = valid;
    }

    /// One scheduling tick: read `AL_CONTROL`/`WDOG_STATUS`, run the current
    /// state's routine, fire `on_entry` on a state change, and write back
    /// `AL_STATUS_CODE` then `AL_STATUS` if anything changed. Must be called
    /// faster than the watchdog divider configured on the ESC (spec §4.4).
    pub fn play(&mut self) -> Result<(), Error> {
        let control = AlControl { value: self.esc.read_register::<u16>(RegisterAddress::AlControl)? };
        self.status.al_watchdog_process_data =
            self.esc.read_register::<u16>(RegisterAddress::SyncManagerWatchdogStatus).unwrap_or(1);

        let mut new_status = match common_routine(self.status, control, self.current) {
            Some(guarded) => guarded,
            None => routine_internal(self.current, &mut self.esc, &self.mailbox_sms, &self.pdo_sms, self.status, control)?,
        };

        let new_state = new_status.state();
        if new_state != self.current {
            let resolved = if matches!(new_state, State::Other(_)) { State::Init } else { new_state };
            if resolved != self.current {
                self.on_entry(self.current, resolved);
                self.current = resolved;
            }
            new_status.al_status = (new_status.al_status & !(MASK_STATE)) | resolved.nibble() as u16;
        }

        if self.status.al_status != new_status.al_status || self.status.al_status_code != new_status.al_status_code {
            self.status = new_status;
            self.esc.write_register(RegisterAddress::AlStatusCode, &self.status.al_status_code)?;
            self.esc.write_register(RegisterAddress::AlStatus, &self.status.al_status)?;
        }

        Ok(())
    }

    /// Activate/deactivate sync managers on state entry, per
    /// `Init::on_entry`/`PreOP::on_entry`/`SafeOP::on_entry`.
    fn on_entry(&mut self, old: State, new: State) {
        match new {
            State::Init => {
                let _ = self.esc.set_sm_activate(&self.mailbox_sms, false);
                let _ = self.esc.set_sm_activate(&self.pdo_sms, false);
            }
            State::PreOp => {
                let _ = self.esc.set_sm_activate(&self.mailbox_sms, true);
                let _ = self.esc.set_sm_activate(&self.pdo_sms, false);
            }
            State::SafeOp => {
                if old == State::Operational && self.status.al_status_code != AlStatusCode::NoError.code() {
                    let _ = self.esc.set_sm_activate(&self.pdo_sms, false);
                } else {
                    let _ = self.esc.set_sm_activate(&self.pdo_sms, true);
                }
            }
            State::Operational | State::Boot | State::Other(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esc::MemoryEsc;

    fn machine() -> StateMachine<MemoryEsc> {
        StateMachine::new(MemoryEsc::new(), Vec::new(), Vec::new())
    }

    fn set_control(sm: &mut StateMachine<MemoryEsc>, value: u16) {
        sm.esc.write_register(RegisterAddress::AlControl, &value).unwrap();
    }

    #[test]
    fn init_with_no_mailbox_moves_straight_to_preop() {
        let mut sm = machine();
        set_control(&mut sm, State::PreOp.nibble() as u16);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::PreOp);
    }

    #[test]
    fn unknown_requested_state_is_rejected() {
        let mut sm = machine();
        set_control(&mut sm, 0x0f);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::Init);
        assert_eq!(sm.status.al_status_code, AlStatusCode::UnknownRequestedState.code());
    }

    #[test]
    fn safe_op_to_operational_requires_valid_output_data() {
        let mut sm = machine();
        set_control(&mut sm, State::PreOp.nibble() as u16);
        sm.play().unwrap();
        set_control(&mut sm, State::SafeOp.nibble() as u16);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::SafeOp);

        set_control(&mut sm, State::Operational.nibble() as u16);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::SafeOp, "output data not yet marked valid");

        sm.set_output_data_valid(true);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::Operational);
    }

    #[test]
    fn watchdog_expiry_in_operational_drops_to_safe_op() {
        let mut sm = machine();
        sm.esc.write_register::<u16>(RegisterAddress::SyncManagerWatchdogStatus, &1).unwrap();
        set_control(&mut sm, State::PreOp.nibble() as u16);
        sm.play().unwrap();
        set_control(&mut sm, State::SafeOp.nibble() as u16);
        sm.play().unwrap();
        sm.set_output_data_valid(true);
        set_control(&mut sm, State::Operational.nibble() as u16);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::Operational);

        sm.play().unwrap();
        assert_eq!(sm.state(), State::Operational, "watchdog still healthy");

        sm.esc.write_register::<u16>(RegisterAddress::SyncManagerWatchdogStatus, &0).unwrap();
        sm.play().unwrap();
        assert_eq!(sm.state(), State::SafeOp);
        assert_eq!(sm.status.al_status_code, AlStatusCode::SyncManagerWatchdog.code());
    }

    #[test]
    fn boot_request_is_always_rejected() {
        let mut sm = machine();
        set_control(&mut sm, State::Boot.nibble() as u16);
        sm.play().unwrap();
        assert_eq!(sm.state(), State::Init);
        assert_eq!(sm.status.al_status_code, AlStatusCode::BootstrapNotSupported.code());
    }

    #[test]
    fn error_ack_latches_until_init_or_matching_ack() {
        let mut sm = machine();
        set_control(&mut sm, State::Boot.nibble() as u16);
        sm.play().unwrap();
        assert!(sm.status.error_ack_pending());

        set_control(&mut sm, State::PreOp.nibble() as u16);
        sm.play().unwrap();
        assert!(sm.status.error_ack_pending(), "non-INIT request leaves the latch set");

        set_control(&mut sm, State::Init.nibble() as u16);
        sm.play().unwrap();
        assert!(!sm.status.error_ack_pending());
        assert_eq!(sm.state(), State::Init);
    }
}

//! Cloud-to-device commands.
//!
//! A command payload is a single ASCII word. Anything that is not an exact
//! match (after trimming surrounding whitespace) is [`Command::Unrecognized`]
//! and must not change any output.

use embedded_hal::digital::OutputPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Led(LedState),
    Unrecognized,
}

impl Command {
    pub fn decode(payload: &[u8]) -> Self {
        match payload.trim_ascii() {
            b"ledon" => Command::Led(LedState::On),
            b"ledoff" => Command::Led(LedState::Off),
            _ => Command::Unrecognized,
        }
    }
}

/// Carries out decoded commands.
pub trait CommandInterpreter {
    fn interpret(&mut self, command: Command);
}

/// Drives a status LED from `ledon`/`ledoff` commands.
pub struct LedInterpreter<P> {
    pin: P,
}

impl<P: OutputPin> LedInterpreter<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> CommandInterpreter for LedInterpreter<P> {
    fn interpret(&mut self, command: Command) {
        let result = match command {
            Command::Led(LedState::On) => self.pin.set_high(),
            Command::Led(LedState::Off) => self.pin.set_low(),
            Command::Unrecognized => {
                warn!("ignoring unrecognized command");
                return;
            }
        };
        match result {
            Ok(()) => info!("LED {:?}", command),
            Err(_) => error!("LED pin write failed"),
        }
    }
}

/// Decodes command payloads and hands them to an interpreter.
pub struct CommandDispatch<I> {
    interpreter: I,
}

impl<I: CommandInterpreter> CommandDispatch<I> {
    pub fn new(interpreter: I) -> Self {
        Self { interpreter }
    }

    pub fn handle(&mut self, payload: &[u8]) -> Command {
        let command = Command::decode(payload);
        self.interpreter.interpret(command);
        command
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::convert::Infallible;
    use std::vec;
    use std::vec::Vec;

    #[derive(Default)]
    struct RecordingPin {
        writes: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.writes.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.writes.push(true);
            Ok(())
        }
    }

    #[test]
    fn decodes_exact_words_only() {
        assert_eq!(Command::decode(b"ledon"), Command::Led(LedState::On));
        assert_eq!(Command::decode(b" ledoff\n"), Command::Led(LedState::Off));
        assert_eq!(Command::decode(b"ledonledoff"), Command::Unrecognized);
        assert_eq!(Command::decode(b"please ledon"), Command::Unrecognized);
        assert_eq!(Command::decode(b"LEDON"), Command::Unrecognized);
        assert_eq!(Command::decode(b""), Command::Unrecognized);
    }

    #[test]
    fn led_follows_commands() {
        let mut dispatch = CommandDispatch::new(LedInterpreter::new(RecordingPin::default()));
        dispatch.handle(b"ledon");
        dispatch.handle(b"ledoff");
        assert_eq!(dispatch.interpreter().pin.writes, vec![true, false]);
    }

    #[test]
    fn unrecognized_command_leaves_pin_untouched() {
        let mut dispatch = CommandDispatch::new(LedInterpreter::new(RecordingPin::default()));
        assert_eq!(dispatch.handle(b"blink"), Command::Unrecognized);
        assert!(dispatch.interpreter().pin.writes.is_empty());
    }
}

//! Boot-mode pin sampling.

use embedded_hal::digital::InputPin;

/// Reports whether the pin named by the boot config is being held.
///
/// The pin number comes from flash, so implementations must answer `false`
/// for pins they do not know rather than fail.
pub trait BootPins {
    fn pin_asserted(&mut self, pin: u8) -> bool;
}

/// A single pulled-up input that counts as asserted while held low.
pub struct ActiveLowPin<P: InputPin> {
    pin: P,
    number: u8,
}

impl<P: InputPin> ActiveLowPin<P> {
    pub fn new(pin: P, number: u8) -> Self {
        Self { pin, number }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: InputPin> BootPins for ActiveLowPin<P> {
    fn pin_asserted(&mut self, pin: u8) -> bool {
        if pin != self.number {
            return false;
        }
        match self.pin.is_low() {
            Ok(low) => low,
            Err(_) => {
                warn!("boot pin {} read failed", pin);
                false
            }
        }
    }
}

impl<T: BootPins + ?Sized> BootPins for &mut T {
    fn pin_asserted(&mut self, pin: u8) -> bool {
        (**self).pin_asserted(pin)
    }
}

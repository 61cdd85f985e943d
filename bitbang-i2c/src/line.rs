//! Open-drain line model.
//!
//! What a participant drives onto a line and what it observes on the line are
//! kept as separate values. The observed level is the wired-AND of every
//! participant's drive: the line reads high unless someone pulls it low.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Drive {
    /// Actively driving the given level. Driving high is equivalent to
    /// releasing on an open-drain line.
    Driving(bool),
    #[default]
    Released,
}

impl Drive {
    /// Whether this drive pulls the line low.
    pub fn pulls_low(self) -> bool {
        self == Drive::Driving(false)
    }
}

/// Resolved levels of both bus lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineLevels {
    pub scl: bool,
    pub sda: bool,
}

impl LineLevels {
    /// Both lines pulled up, no transfer in progress.
    pub const IDLE: Self = Self {
        scl: true,
        sda: true,
    };
}

impl Default for LineLevels {
    fn default() -> Self {
        Self::IDLE
    }
}

/// Wired-AND of every drive on one line.
pub fn resolve(drives: &[Drive]) -> bool {
    !drives.iter().any(|drive| drive.pulls_low())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wired_and() {
        #[rustfmt::skip]
        let table = [
            (&[][..], true),
            (&[Drive::Released, Drive::Released][..], true),
            (&[Drive::Driving(true), Drive::Released][..], true),
            (&[Drive::Driving(true), Drive::Driving(false)][..], false),
            (&[Drive::Released, Drive::Driving(false)][..], false),
        ];

        for (drives, expected) in table {
            assert_eq!(resolve(drives), expected, "{drives:?}");
        }
    }
}

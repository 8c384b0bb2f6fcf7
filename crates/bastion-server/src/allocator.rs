//! Port pool and lowest-free-port allocation.

use std::fmt;

use crate::error::RegistryError;

/// Default lower bound of the forwarded-port pool.
pub const DEFAULT_PORT_MIN: u16 = 10022;
/// Default upper bound (inclusive); 78 slots with [`DEFAULT_PORT_MIN`].
pub const DEFAULT_PORT_MAX: u16 = 10099;

/// A closed range `[min, max]` of ports handed out to machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPool {
    min: u16,
    max: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port pool: min {min} is greater than max {max}")]
pub struct InvalidPortPool {
    pub min: u16,
    pub max: u16,
}

impl PortPool {
    pub const fn new(min: u16, max: u16) -> Result<Self, InvalidPortPool> {
        if min > max {
            return Err(InvalidPortPool { min, max });
        }
        Ok(Self { min, max })
    }

    pub const fn min(&self) -> u16 {
        self.min
    }

    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports in the pool.
    pub const fn capacity(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    pub const fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    /// Pick the lowest port in the pool that is not in `used`.
    ///
    /// `used` may be in any order and may contain ports outside the pool.
    pub fn allocate<I>(&self, used: I) -> Result<u16, RegistryError>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut taken = vec![false; self.capacity()];
        for port in used {
            if self.contains(port) {
                taken[usize::from(port - self.min)] = true;
            }
        }

        taken
            .iter()
            .position(|t| !t)
            .and_then(|offset| u16::try_from(offset).ok())
            .map(|offset| self.min + offset)
            .ok_or(RegistryError::PoolExhausted {
                capacity: self.capacity(),
            })
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self {
            min: DEFAULT_PORT_MIN,
            max: DEFAULT_PORT_MAX,
        }
    }
}

impl fmt::Display for PortPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

//! Kademlia node Id or a lookup target
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::Error;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits.
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash, Serialize, Deserialize)]
/// Kademlia node Id or a lookup target
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Create a random Id.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, Error> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// Derive a value key from arbitrary data, as the SHA-1 hash of it.
    pub fn from_data(data: &[u8]) -> Id {
        Id(sha1_smol::Sha1::from(data).digest().bytes())
    }

    /// The smallest possible Id, all zero bits.
    pub const fn min() -> Id {
        Id([0; ID_SIZE])
    }

    /// The largest possible Id, all one bits.
    pub const fn max() -> Id {
        Id([u8::MAX; ID_SIZE])
    }

    /// Returns a byte slice of this Id.
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// XOR metric between this Id and `other`, as an Id that compares like
    /// an unsigned big-endian integer.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    /// Bitwise complement, the Id furthest away from this one.
    pub fn invert(&self) -> Id {
        let mut result = self.0;

        for byte in result.iter_mut() {
            *byte = !*byte;
        }

        Id(result)
    }

    /// Compare `self` and `other` by their XOR distance to `target`.
    ///
    /// Distinct Ids never tie, since XOR against a fixed target is a bijection.
    pub fn cmp_distance(&self, other: &Id, target: &Id) -> Ordering {
        self.xor(target)
            .cmp(&other.xor(target))
            .then_with(|| self.cmp(other))
    }

    /// Returns `true` if `self` is strictly closer to `target` than `other`.
    pub fn is_nearer_to(&self, target: &Id, other: &Id) -> bool {
        self.cmp_distance(other, target) == Ordering::Less
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is [MAX_DISTANCE] minus the number of leading zero bits
    /// of the XOR result, ie. the position of its highest set bit, counted from 1.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                let leading_zeros = (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;

                return MAX_DISTANCE - leading_zeros;
            }
        }

        0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id, Error> {
        if s.len() != ID_SIZE * 2 {
            return Err(Error::InvalidIdSize(s.len() / 2));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = s
                .get(i * 2..i * 2 + 2)
                .ok_or_else(|| Error::InvalidIdEncoding(s.to_string()))?;

            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

//! Object Identifier (OID) type.
//!
//! OIDs are stored as `SmallVec<[u32; 16]>` to avoid heap allocation for common OIDs.

use crate::error::{DecodeErrorKind, Error, OidErrorKind, Result};
use smallvec::SmallVec;
use std::fmt;

/// Maximum number of arcs (subidentifiers) in an OID (RFC 2578 Section 3.5).
pub const MAX_OID_LEN: usize = 128;

/// Object Identifier.
///
/// An immutable sequence of arcs naming a node in the management tree.
/// Ordering is lexicographic over the arcs, which is the order GETNEXT
/// traverses.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// Create an empty OID.
    pub fn empty() -> Self {
        Self {
            arcs: SmallVec::new(),
        }
    }

    /// Create an OID from arc values.
    ///
    /// ```
    /// use snmp_query::oid::Oid;
    ///
    /// let oid = Oid::new([1, 3, 6, 1, 2, 1]);
    /// assert_eq!(oid.len(), 6);
    /// ```
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Create an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse dotted-decimal notation (e.g. `"1.3.6.1.2.1.1.5.0"`).
    ///
    /// A single leading dot is accepted (`".1.3.6.1"`). Empty arcs, non-numeric
    /// arcs and arcs above `u32::MAX` are rejected. Arc constraints are checked
    /// with [`validate()`](Self::validate).
    ///
    /// ```
    /// use snmp_query::oid::Oid;
    ///
    /// let sys_name = Oid::parse("1.3.6.1.2.1.1.5.0").unwrap();
    /// assert_eq!(sys_name.to_string(), "1.3.6.1.2.1.1.5.0");
    /// assert!(Oid::parse("1.3..6").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let body = s.strip_prefix('.').unwrap_or(s);
        if body.is_empty() {
            return Err(Error::invalid_oid_with_input(OidErrorKind::Empty, s));
        }

        let arcs = body
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s));
                }
                part.parse::<u32>()
                    .map_err(|_| Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s))
            })
            .collect::<Result<SmallVec<[u32; 16]>>>()?;

        let oid = Self { arcs };
        oid.validate_length()?;
        Ok(oid)
    }

    /// Get the arc values.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Get the number of arcs.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Check if the OID is empty.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Check if this OID starts with another OID.
    ///
    /// Every OID starts with itself and with the empty OID.
    pub fn starts_with(&self, other: &Oid) -> bool {
        self.arcs.get(..other.arcs.len()) == Some(&other.arcs[..])
    }

    /// Strict descendant check: `self` is below `root` and not equal to it.
    ///
    /// ```
    /// use snmp_query::oid;
    ///
    /// let system = oid!(1, 3, 6, 1, 2, 1, 1);
    /// assert!(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0).is_descendant_of(&system));
    /// assert!(!system.is_descendant_of(&system));
    /// assert!(!oid!(1, 3, 6, 1, 2, 1, 2, 1).is_descendant_of(&system));
    /// ```
    pub fn is_descendant_of(&self, root: &Oid) -> bool {
        self.arcs.len() > root.arcs.len() && self.starts_with(root)
    }

    /// Get the parent OID (all arcs except the last).
    ///
    /// Returns `None` if the OID is empty.
    pub fn parent(&self) -> Option<Oid> {
        let (_, init) = self.arcs.split_last()?;
        Some(Oid::from_slice(init))
    }

    /// Create a child OID by appending an arc.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Oid { arcs }
    }

    /// Arcs after `prefix`, if `self` starts with it (the row index of a
    /// table cell relative to its column).
    pub fn suffix_after(&self, prefix: &Oid) -> Option<&[u32]> {
        if self.starts_with(prefix) {
            Some(&self.arcs[prefix.arcs.len()..])
        } else {
            None
        }
    }

    /// Validate arcs per X.690 Section 8.19.4.
    ///
    /// - there must be at least two arcs
    /// - arc1 must be 0, 1, or 2
    /// - arc2 must be <= 39 when arc1 is 0 or 1
    pub fn validate(&self) -> Result<()> {
        match self.arcs.as_slice() {
            [] | [_] => Err(Error::invalid_oid(OidErrorKind::TooFewArcs {
                count: self.arcs.len(),
            })),
            [first, ..] if *first > 2 => {
                Err(Error::invalid_oid(OidErrorKind::InvalidFirstArc(*first)))
            }
            [first, second, ..] if *first < 2 && *second >= 40 => {
                Err(Error::invalid_oid(OidErrorKind::InvalidSecondArc {
                    first: *first,
                    second: *second,
                }))
            }
            _ => Ok(()),
        }
    }

    /// Validate that the OID doesn't exceed [`MAX_OID_LEN`].
    pub fn validate_length(&self) -> Result<()> {
        if self.arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid(OidErrorKind::TooManyArcs {
                count: self.arcs.len(),
                max: MAX_OID_LEN,
            }));
        }
        Ok(())
    }

    /// Encode the OID content octets (X.690 Section 8.19).
    ///
    /// The first two arcs are packed as `arc1 * 40 + arc2`; every
    /// subidentifier is base-128 with the high bit marking continuation.
    /// An empty OID encodes as zero octets. Arc constraints are not checked
    /// here; see [`to_ber_checked()`](Self::to_ber_checked).
    pub fn to_ber_smallvec(&self) -> SmallVec<[u8; 64]> {
        let mut bytes = SmallVec::new();

        let (first, rest): (u64, &[u32]) = match self.arcs.as_slice() {
            [] => return bytes,
            [a] => (*a as u64 * 40, &[]),
            [a, b, rest @ ..] => (*a as u64 * 40 + *b as u64, rest),
        };

        encode_subidentifier(&mut bytes, first);
        for &arc in rest {
            encode_subidentifier(&mut bytes, arc as u64);
        }
        bytes
    }

    /// Encode to BER content octets.
    pub fn to_ber(&self) -> Vec<u8> {
        self.to_ber_smallvec().to_vec()
    }

    /// Encode to BER content octets after validating arcs and length.
    pub fn to_ber_checked(&self) -> Result<Vec<u8>> {
        self.validate()?;
        self.validate_length()?;
        Ok(self.to_ber())
    }

    /// Decode from BER content octets.
    ///
    /// Offsets in errors are relative to `data`.
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::malformed(0, DecodeErrorKind::EmptyOid));
        }

        let mut arcs: SmallVec<[u32; 16]> = SmallVec::new();

        let (first, mut i) = decode_subidentifier(data, 0)?;
        match first {
            0..40 => arcs.extend([0, first]),
            40..80 => arcs.extend([1, first - 40]),
            _ => arcs.extend([2, first - 80]),
        }

        while i < data.len() {
            let (arc, next) = decode_subidentifier(data, i)?;
            arcs.push(arc);
            i = next;

            if arcs.len() > MAX_OID_LEN {
                return Err(Error::malformed(
                    i,
                    DecodeErrorKind::OidTooLong {
                        count: arcs.len(),
                        max: MAX_OID_LEN,
                    },
                ));
            }
        }

        Ok(Self { arcs })
    }
}

#[inline]
fn encode_subidentifier(bytes: &mut SmallVec<[u8; 64]>, value: u64) {
    let groups = (64 - value.leading_zeros()).div_ceil(7).max(1);
    for i in (0..groups).rev() {
        let mut byte = ((value >> (i * 7)) & 0x7F) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        bytes.push(byte);
    }
}

/// Decode one subidentifier starting at `start`, returning (value, next offset).
fn decode_subidentifier(data: &[u8], start: usize) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    let mut i = start;

    loop {
        let Some(&byte) = data.get(i) else {
            return Err(Error::malformed(i, DecodeErrorKind::TruncatedData));
        };
        i += 1;

        if value > (u32::MAX >> 7) {
            return Err(Error::malformed(i, DecodeErrorKind::InvalidOidEncoding));
        }
        value = (value << 7) | (byte & 0x7F) as u32;

        if byte & 0x80 == 0 {
            return Ok((value, i));
        }
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = self.arcs.iter();
        if let Some(first) = arcs.next() {
            write!(f, "{}", first)?;
        }
        for arc in arcs {
            write!(f, ".{}", arc)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::new(arcs)
    }
}

/// Build an [`Oid`] from literal arcs.
///
/// ```
/// use snmp_query::oid;
///
/// let sys_name = oid!(1, 3, 6, 1, 2, 1, 1, 5, 0);
/// assert_eq!(sys_name.to_string(), "1.3.6.1.2.1.1.5.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}

//! Address abstraction: a peer is either unset, a proxy name, or an
//! IPv4 endpoint. Grounded on the original `CommAddress` type, which
//! orders first by variant, then by the variant's own ordering.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// Identifies a peer: unresolved, a proxy mnemonic, or a concrete endpoint.
#[derive(Clone, Debug, Eq)]
pub enum Address {
    Unset,
    Proxy(String),
    Inet(Ipv4Addr, u16),
}

impl Address {
    pub fn from_inet(ip: Ipv4Addr, port: u16) -> Address {
        Address::Inet(ip, port)
    }

    pub fn from_proxy<S: Into<String>>(name: S) -> Address {
        Address::Proxy(name.into())
    }

    pub fn set_proxy<S: Into<String>>(&mut self, name: S) {
        *self = Address::Proxy(name.into());
    }

    pub fn set_inet(&mut self, ip: Ipv4Addr, port: u16) {
        *self = Address::Inet(ip, port);
    }

    pub fn clear(&mut self) {
        *self = Address::Unset;
    }

    pub fn is_proxy(&self) -> bool {
        match *self {
            Address::Proxy(_) => true,
            _ => false,
        }
    }

    pub fn is_inet(&self) -> bool {
        match *self {
            Address::Inet(..) => true,
            _ => false,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.is_unset()
    }

    pub fn is_unset(&self) -> bool {
        match *self {
            Address::Unset => true,
            _ => false,
        }
    }

    fn ordinal(&self) -> u8 {
        match *self {
            Address::Unset => 0,
            Address::Proxy(_) => 1,
            Address::Inet(..) => 2,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Address::Unset => f.write_str("[NULL]"),
            Address::Proxy(ref name) => f.write_str(name),
            Address::Inet(ip, port) => write!(f, "{}:{}", ip, port),
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Address) -> bool {
        match (self, other) {
            (&Address::Unset, &Address::Unset) => true,
            (&Address::Proxy(ref a), &Address::Proxy(ref b)) => a == b,
            (&Address::Inet(ia, pa), &Address::Inet(ib, pb)) => ia == ib && pa == pb,
            _ => false,
        }
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordinal().hash(state);
        match *self {
            Address::Unset => {}
            Address::Proxy(ref name) => name.hash(state),
            Address::Inet(ip, port) => {
                ip.hash(state);
                port.hash(state);
            }
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Address) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Address) -> Ordering {
        match (self, other) {
            (&Address::Proxy(ref a), &Address::Proxy(ref b)) => a.cmp(b),
            (&Address::Inet(ia, pa), &Address::Inet(ib, pb)) => (ia, pa).cmp(&(ib, pb)),
            _ => self.ordinal().cmp(&other.ordinal()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(a: &Address) -> u64 {
        let mut h = DefaultHasher::new();
        a.hash(&mut h);
        h.finish()
    }

    #[test]
    fn unset_equals_unset() {
        assert_eq!(Address::Unset, Address::Unset);
    }

    #[test]
    fn to_string_variants() {
        assert_eq!(Address::Unset.to_string(), "[NULL]");
        assert_eq!(Address::from_proxy("rs-7").to_string(), "rs-7");
        let a = Address::from_inet(Ipv4Addr::new(10, 0, 0, 5), 38060);
        assert_eq!(a.to_string(), "10.0.0.5:38060");
    }

    #[test]
    fn ordering_is_by_variant_then_value() {
        let unset = Address::Unset;
        let proxy = Address::from_proxy("rs-7");
        let inet = Address::from_inet(Ipv4Addr::new(127, 0, 0, 1), 80);
        assert!(unset < proxy);
        assert!(proxy < inet);
    }

    #[test]
    fn equal_addresses_hash_equal() {
        let a = Address::from_inet(Ipv4Addr::new(1, 2, 3, 4), 100);
        let b = Address::from_inet(Ipv4Addr::new(1, 2, 3, 4), 100);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn different_variants_are_not_equal() {
        let proxy = Address::from_proxy("rs-7");
        let inet = Address::from_inet(Ipv4Addr::new(1, 2, 3, 4), 100);
        assert_ne!(proxy, inet);
    }
}

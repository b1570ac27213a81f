//! Address wrapper: the collaborator spec.md §2 calls "address wrappers".
//!
//! `original_source/src/address.{h,cc}` models a small family of address
//! types (`IPv4Address`, `IPv6Address`, `UnixAddress`) behind a common
//! `Address` base. This pack only needs IPv4/IPv6 TCP addressing for the
//! HTTP and TCP-server consumers, so `Address` here is a thin newtype over
//! `std::net::SocketAddr` with the raw-`sockaddr` conversions the hook
//! layer's `connect`/`bind` calls need.
use std::net::SocketAddr;

/// A socket address, convertible to and from the raw `sockaddr` the hook
/// layer's libc calls operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address(SocketAddr);

impl Address {
    pub fn new(addr: SocketAddr) -> Self {
        Address(addr)
    }

    pub fn to_std(self) -> Option<SocketAddr> {
        Some(self.0)
    }

    /// Render as a `sockaddr_storage` plus the length of the family-specific
    /// struct written into it, for `connect`/`bind`. `sockaddr_storage` is
    /// used instead of `sockaddr` because a V6 address (28 bytes) does not
    /// fit in a bare `sockaddr` (16 bytes); callers cast the storage's
    /// address to `*const sockaddr` when calling into libc, the same way
    /// `from_sockaddr_storage` below reads one back.
    pub fn to_sockaddr(self) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        match self.0 {
            SocketAddr::V4(v4) => {
                let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
                unsafe {
                    (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                    (*sin).sin_port = v4.port().to_be();
                    (*sin).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                }
                (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            SocketAddr::V6(v6) => {
                let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
                unsafe {
                    (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                    (*sin6).sin6_port = v6.port().to_be();
                    (*sin6).sin6_addr.s6_addr = v6.ip().octets();
                }
                (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }

    /// Parse a `sockaddr_storage` as returned by `getpeername`/`getsockname`.
    pub fn from_sockaddr_storage(storage: &libc::sockaddr_storage) -> Option<Address> {
        match storage.ss_family as i32 {
            libc::AF_INET => {
                let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
                let ip = std::net::Ipv4Addr::from(u32::from_ne_bytes(sin.sin_addr.s_addr.to_ne_bytes()));
                let port = u16::from_be(sin.sin_port);
                Some(Address(SocketAddr::new(ip.into(), port)))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
                let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                let port = u16::from_be(sin6.sin6_port);
                Some(Address(SocketAddr::new(ip.into(), port)))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address(addr)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips_through_sockaddr_storage() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let wrapped = Address::new(addr);
        let (storage, len) = wrapped.to_sockaddr();
        assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in>());
        let parsed = Address::from_sockaddr_storage(&storage).unwrap();
        assert_eq!(parsed.to_std(), Some(addr));
    }

    #[test]
    fn v6_round_trips_through_sockaddr_storage() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        let wrapped = Address::new(addr);
        let (storage, len) = wrapped.to_sockaddr();
        assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in6>());
        let parsed = Address::from_sockaddr_storage(&storage).unwrap();
        assert_eq!(parsed.to_std(), Some(addr));
    }
}

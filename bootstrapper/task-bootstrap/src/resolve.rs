use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

pub const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(
        "Time ran out while resolving '{host}'. \
         Customize timeout with --resolve-timeout, or use --verbose to see attempts."
    )]
    Timeout { host: String },

    #[error(
        "Time ran out waiting for {host} to resolve to {expected}. \
         Customize timeout with --resolve-timeout, or use --verbose to see attempts."
    )]
    SelfResolutionTimeout { host: String, expected: IpAddr },

    #[error(
        "Missing required envvars to build task DNS address. \
         Ensure that TASK_NAME and FRAMEWORK_HOST are both set or \
         disable self resolution with --self-resolve=false"
    )]
    MissingTaskIdentity,
}

/// Absolute cutoff for a retry loop. An unbounded deadline never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn never() -> Self {
        Deadline(None)
    }

    /// A deadline `timeout` from now; a zero timeout means wait forever.
    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Deadline(None)
        } else {
            Deadline(Some(Instant::now() + timeout))
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}

/// Name lookup used by the [`Resolver`].
pub trait Lookup {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Lookup through the platform resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl Lookup for SystemLookup {
    fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let mut addrs: Vec<IpAddr> = Vec::new();
        for sock in (host, 0u16).to_socket_addrs()? {
            if !addrs.contains(&sock.ip()) {
                addrs.push(sock.ip());
            }
        }
        Ok(addrs)
    }
}

pub struct Resolver<L> {
    lookup: L,
    retry_delay: Duration,
}

impl Resolver<SystemLookup> {
    pub fn system() -> Self {
        Self::new(SystemLookup)
    }
}

impl<L: Lookup> Resolver<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            retry_delay: RESOLVE_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Blocks until `host` resolves to at least one address. Lookup errors
    /// and empty answers are both retried until `deadline` expires.
    pub fn resolve(&self, host: &str, deadline: &Deadline) -> Result<Vec<IpAddr>, ResolveError> {
        info!("Waiting for '{}' to resolve...", host);

        loop {
            match self.lookup.lookup(host) {
                Ok(addrs) if !addrs.is_empty() => {
                    info!("Resolved '{}' => {:?}", host, addrs);
                    return Ok(addrs);
                }
                Ok(_) => debug!("No results for host '{}'", host),
                Err(e) => debug!("Lookup failed: {}", e),
            }

            if deadline.is_expired() {
                return Err(ResolveError::Timeout {
                    host: host.to_string(),
                });
            }

            thread::sleep(self.retry_delay);
        }
    }

    /// Resolves every host in order, sharing one deadline across the list.
    pub fn wait_for_hosts(&self, hosts: &[String], timeout: Duration) -> Result<(), ResolveError> {
        let deadline = Deadline::after(timeout);
        for host in hosts {
            self.resolve(host, &deadline)?;
        }
        debug!("Hosts resolved, continuing bootstrap.");
        Ok(())
    }

    /// Waits until `task_host` resolves to exactly one address equal to
    /// `expected`. Zero, several, or a mismatched address count as not yet
    /// converged.
    pub fn verify_self(
        &self,
        task_host: Option<&str>,
        expected: IpAddr,
        timeout: Duration,
    ) -> Result<(), ResolveError> {
        let host = task_host.ok_or(ResolveError::MissingTaskIdentity)?;
        info!("Waiting for {} to resolve to {}", host, expected);

        let deadline = Deadline::after(timeout);
        loop {
            let addrs = self.resolve(host, &deadline)?;
            match addrs.as_slice() {
                [only] if *only == expected => {
                    info!("{} resolved to {} as expected.", host, expected);
                    return Ok(());
                }
                [other] => debug!(
                    "{} resolved to {}, which does not match the expected task ip {}",
                    host, other, expected
                ),
                _ => debug!("{} resolved to multiple addresses. Retrying", host),
            }

            if deadline.is_expired() {
                return Err(ResolveError::SelfResolutionTimeout {
                    host: host.to_string(),
                    expected,
                });
            }

            thread::sleep(self.retry_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays scripted answers; once exhausted, repeats the last one.
    struct Scripted {
        answers: RefCell<VecDeque<io::Result<Vec<IpAddr>>>>,
        last: RefCell<Option<Vec<IpAddr>>>,
        asked: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<io::Result<Vec<IpAddr>>>) -> Self {
            Self {
                answers: RefCell::new(answers.into()),
                last: RefCell::new(None),
                asked: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self::new(Vec::new())
        }

        fn calls(&self) -> usize {
            self.asked.borrow().len()
        }
    }

    impl Lookup for &Scripted {
        fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.asked.borrow_mut().push(host.to_string());
            match self.answers.borrow_mut().pop_front() {
                Some(Ok(addrs)) => {
                    *self.last.borrow_mut() = Some(addrs.clone());
                    Ok(addrs)
                }
                Some(Err(e)) => Err(e),
                None => match self.last.borrow().clone() {
                    Some(addrs) => Ok(addrs),
                    None => Err(io::Error::new(io::ErrorKind::NotFound, "no such host")),
                },
            }
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn not_found() -> io::Result<Vec<IpAddr>> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
    }

    const FAST: Duration = Duration::from_millis(2);

    #[test]
    fn zero_timeout_is_unbounded() {
        assert!(Deadline::after(Duration::ZERO).is_unbounded());
        assert!(!Deadline::never().is_expired());
        assert!(!Deadline::after(Duration::from_secs(60)).is_expired());
    }

    #[test]
    fn resolve_returns_first_non_empty_answer() {
        let lookup = Scripted::new(vec![not_found(), Ok(vec![]), Ok(vec![ip("10.0.0.1")])]);
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);

        let addrs = resolver.resolve("svc.example.com", &Deadline::never()).unwrap();

        assert_eq!(addrs, vec![ip("10.0.0.1")]);
        assert_eq!(lookup.calls(), 3);
    }

    #[test]
    fn resolve_times_out_no_earlier_than_deadline() {
        let lookup = Scripted::failing();
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);
        let timeout = Duration::from_millis(50);

        let start = Instant::now();
        let err = resolver
            .resolve("missing.example.com", &Deadline::after(timeout))
            .unwrap_err();

        assert!(start.elapsed() >= timeout);
        assert!(matches!(err, ResolveError::Timeout { ref host } if host == "missing.example.com"));
        assert!(err.to_string().contains("--resolve-timeout"));
    }

    #[test]
    fn unbounded_deadline_keeps_retrying() {
        let mut answers: Vec<io::Result<Vec<IpAddr>>> = (0..25).map(|_| not_found()).collect();
        answers.push(Ok(vec![ip("10.0.0.2")]));
        let lookup = Scripted::new(answers);
        let resolver = Resolver::new(&lookup).with_retry_delay(Duration::from_millis(1));

        let addrs = resolver.resolve("slow.example.com", &Deadline::never()).unwrap();

        assert_eq!(addrs, vec![ip("10.0.0.2")]);
        assert_eq!(lookup.calls(), 26);
    }

    #[test]
    fn hosts_are_resolved_in_order() {
        let lookup = Scripted::new(vec![Ok(vec![ip("10.0.0.1")]), Ok(vec![ip("10.0.0.2")])]);
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);
        let hosts = vec!["a.example.com".to_string(), "b.example.com".to_string()];

        resolver.wait_for_hosts(&hosts, Duration::ZERO).unwrap();

        assert_eq!(*lookup.asked.borrow(), hosts);
    }

    #[test]
    fn verify_self_requires_task_identity() {
        let lookup = Scripted::failing();
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);

        let err = resolver
            .verify_self(None, ip("10.0.0.1"), Duration::ZERO)
            .unwrap_err();

        assert!(matches!(err, ResolveError::MissingTaskIdentity));
        assert_eq!(lookup.calls(), 0);
    }

    #[test]
    fn verify_self_waits_for_single_matching_address() {
        let expected = ip("10.0.0.5");
        let lookup = Scripted::new(vec![
            Ok(vec![ip("10.0.0.9")]),
            Ok(vec![expected, ip("10.0.0.9")]),
            not_found(),
            Ok(vec![expected]),
        ]);
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);

        resolver
            .verify_self(Some("svc.example.com"), expected, Duration::ZERO)
            .unwrap();

        assert_eq!(lookup.calls(), 4);
    }

    #[test]
    fn verify_self_times_out_on_stale_address() {
        let lookup = Scripted::new(vec![Ok(vec![ip("10.0.0.9")])]);
        let resolver = Resolver::new(&lookup).with_retry_delay(FAST);
        let timeout = Duration::from_millis(40);

        let start = Instant::now();
        let err = resolver
            .verify_self(Some("svc.example.com"), ip("10.0.0.5"), timeout)
            .unwrap_err();

        assert!(start.elapsed() >= timeout);
        match err {
            ResolveError::SelfResolutionTimeout { host, expected } => {
                assert_eq!(host, "svc.example.com");
                assert_eq!(expected, ip("10.0.0.5"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn system_lookup_resolves_loopback_literal() {
        let addrs = SystemLookup.lookup("127.0.0.1").unwrap();
        assert_eq!(addrs, vec![ip("127.0.0.1")]);
    }
}

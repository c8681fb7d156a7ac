//! Pluggable interfaces for external collaborators (spec §6): specified
//! only at their boundary, wrapped by the error injector, never otherwise
//! implemented by the core.

use std::path::Path;
use std::process::ExitStatus;

/// A facade over a git working tree, wrapped by [`crate::injector::ErrorInjector`]
/// for error injection in tests. Not implemented by this crate beyond the
/// trait boundary.
pub trait GitFacade: Send + Sync {
    fn is_repository(&self, dir: &Path) -> crate::Result<bool>;
    fn branch(&self, dir: &Path) -> crate::Result<String>;
    fn short_hash(&self, dir: &Path) -> crate::Result<String>;
    fn status(&self, dir: &Path) -> crate::Result<String>;
    fn command(&self, dir: &Path, args: &[&str]) -> crate::Result<ExitStatus>;
}

/// A facade over outbound network operations, wrapped the same way as
/// [`GitFacade`] for tests that need to inject network-shaped failures.
pub trait NetworkFacade: Send + Sync {
    fn http_get(&self, url: &str) -> crate::Result<Vec<u8>>;
    fn http_post(&self, url: &str, body: &[u8]) -> crate::Result<Vec<u8>>;
    fn dns_lookup(&self, host: &str) -> crate::Result<Vec<std::net::IpAddr>>;
    fn tcp_connect(&self, addr: &str) -> crate::Result<()>;
}

/// Wraps a [`GitFacade`] so every call first consults the error injector
/// with an operation name of `git.<method>` and the repository directory
/// as its path.
pub struct InjectedGitFacade<F> {
    inner: F,
    injector: std::sync::Arc<crate::injector::ErrorInjector>,
}

impl<F: GitFacade> InjectedGitFacade<F> {
    pub fn new(inner: F, injector: std::sync::Arc<crate::injector::ErrorInjector>) -> Self {
        Self { inner, injector }
    }

    fn check(&self, operation: &str, dir: &Path) -> crate::Result<()> {
        let (err, fired) = self.injector.should_inject_error(operation, &dir.to_string_lossy());
        if fired && let Some(err) = err {
            return Err(err.into());
        }
        Ok(())
    }
}

impl<F: GitFacade> GitFacade for InjectedGitFacade<F> {
    fn is_repository(&self, dir: &Path) -> crate::Result<bool> {
        self.check("git.is_repository", dir)?;
        self.inner.is_repository(dir)
    }

    fn branch(&self, dir: &Path) -> crate::Result<String> {
        self.check("git.branch", dir)?;
        self.inner.branch(dir)
    }

    fn short_hash(&self, dir: &Path) -> crate::Result<String> {
        self.check("git.short_hash", dir)?;
        self.inner.short_hash(dir)
    }

    fn status(&self, dir: &Path) -> crate::Result<String> {
        self.check("git.status", dir)?;
        self.inner.status(dir)
    }

    fn command(&self, dir: &Path, args: &[&str]) -> crate::Result<ExitStatus> {
        self.check("git.command", dir)?;
        self.inner.command(dir, args)
    }
}

/// Wraps a [`NetworkFacade`] the same way [`InjectedGitFacade`] wraps a
/// [`GitFacade`] — spec §6 gives the network facade "the same role": every
/// call first consults the error injector with an operation name of
/// `network.<method>` and the target URL/host/address as its path.
pub struct InjectedNetworkFacade<F> {
    inner: F,
    injector: std::sync::Arc<crate::injector::ErrorInjector>,
}

impl<F: NetworkFacade> InjectedNetworkFacade<F> {
    pub fn new(inner: F, injector: std::sync::Arc<crate::injector::ErrorInjector>) -> Self {
        Self { inner, injector }
    }

    fn check(&self, operation: &str, path: &str) -> crate::Result<()> {
        let (err, fired) = self.injector.should_inject_error(operation, path);
        if fired && let Some(err) = err {
            return Err(err.into());
        }
        Ok(())
    }
}

impl<F: NetworkFacade> NetworkFacade for InjectedNetworkFacade<F> {
    fn http_get(&self, url: &str) -> crate::Result<Vec<u8>> {
        self.check("network.http_get", url)?;
        self.inner.http_get(url)
    }

    fn http_post(&self, url: &str, body: &[u8]) -> crate::Result<Vec<u8>> {
        self.check("network.http_post", url)?;
        self.inner.http_post(url, body)
    }

    fn dns_lookup(&self, host: &str) -> crate::Result<Vec<std::net::IpAddr>> {
        self.check("network.dns_lookup", host)?;
        self.inner.dns_lookup(host)
    }

    fn tcp_connect(&self, addr: &str) -> crate::Result<()> {
        self.check("network.tcp_connect", addr)?;
        self.inner.tcp_connect(addr)
    }
}

//! Bootstrap address provider.
//!
//! An [`Origin`] carries the credentials and the ordered list of
//! `(hostname, service)` pairs the session walks through while connecting.
//! When the list is exhausted the session backs off and calls
//! [`Origin::restart`] to begin another round.

/// Credentials plus the iterable list of candidate data-service nodes.
#[derive(Debug, Clone)]
pub struct Origin {
    username: String,
    password: String,
    nodes: Vec<(String, String)>,
    next: usize,
}

impl Origin {
    /// Create an origin over the given node list.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        nodes: Vec<(String, String)>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            nodes,
            next: 0,
        }
    }

    /// Convenience constructor for a single `host:port` endpoint.
    pub fn single(
        username: impl Into<String>,
        password: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::new(
            username,
            password,
            vec![(hostname.into(), port.to_string())],
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether every address has been handed out since the last restart.
    pub fn exhausted(&self) -> bool {
        self.next >= self.nodes.len()
    }

    /// Hand out the next `(hostname, service)` pair.
    ///
    /// # Panics
    ///
    /// Panics when called on an exhausted origin; callers check
    /// [`Origin::exhausted`] first.
    pub fn next_address(&mut self) -> (String, String) {
        let address = self.nodes[self.next].clone();
        self.next += 1;
        address
    }

    /// Begin a new round over the node list.
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

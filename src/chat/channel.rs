//! Channel, team and user value types.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A keybase team.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Team {
    name: String,
}

impl Team {
    /// Create a team value from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The team name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A keybase account, identified by its lower-cased handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    handle: String,
}

impl User {
    /// Create a user value. The handle is lower-cased.
    pub fn new(handle: impl AsRef<str>) -> Self {
        Self {
            handle: handle.as_ref().to_lowercase(),
        }
    }

    /// The lower-cased handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Check that the handle is not blank.
    pub fn is_valid(&self) -> bool {
        !self.handle.trim().is_empty()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle)
    }
}

impl From<&str> for User {
    fn from(s: &str) -> Self {
        User::new(s)
    }
}

/// A chat destination: a named conversation, optionally inside a team.
///
/// Names compare case-insensitively; teams compare exactly.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    team: Option<Team>,
}

impl Channel {
    /// A non-team conversation such as `alice,bob`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: None,
        }
    }

    /// A named channel inside a team.
    pub fn in_team(team: Team, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: Some(team),
        }
    }

    /// The direct conversation between `other` and `me`.
    pub fn direct(other: &User, me: &User) -> Self {
        Self::new(format!("{},{}", other, me))
    }

    /// The conversation an account holds with itself.
    pub fn self_channel(me: &User) -> Self {
        Self::new(me.handle())
    }

    /// The channel name (topic name for team channels).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning team, if any.
    pub fn team(&self) -> Option<&Team> {
        self.team.as_ref()
    }

    /// Check that the name is not blank.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Check whether this channel lives in a team.
    pub fn is_team(&self) -> bool {
        self.team.is_some()
    }

    /// Check whether this is a direct conversation between accounts.
    pub fn is_direct(&self) -> bool {
        !self.is_team() && self.name.contains(',')
    }

    /// The first participant of a direct conversation.
    pub fn direct_recipient(&self) -> Option<User> {
        if !self.is_direct() {
            return None;
        }
        self.name.split(',').next().map(User::new)
    }

    /// Check whether this is the two-party conversation between `a` and `b`,
    /// in either order.
    pub fn is_direct_between(&self, a: &User, b: &User) -> bool {
        if !self.is_direct() {
            return false;
        }
        let mut parts = self.name.split(',').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(x), Some(y), None) => {
                (x.eq_ignore_ascii_case(a.handle()) && y.eq_ignore_ascii_case(b.handle()))
                    || (x.eq_ignore_ascii_case(b.handle()) && y.eq_ignore_ascii_case(a.handle()))
            }
            _ => false,
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.team == other.team && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
        self.team.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.team {
            Some(team) => write!(f, "{}#{}", team, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

//! Stable task identifiers.
//!
//! Task names are interned once into a process-wide `lasso` rodeo, so ids are
//! `Copy`, hash as a single integer and still print their name in logs.

use std::fmt;
use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static TASK_NAMES: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Interned, stable identifier of a task in a [`TaskGraph`](super::TaskGraph).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Spur);

impl TaskId {
    /// Interns `name`. Calling this twice with the same name yields equal ids.
    #[inline]
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(TASK_NAMES.get_or_intern(name))
    }

    /// Looks up an id without interning.
    #[inline]
    #[must_use]
    pub fn existing(name: &str) -> Option<Self> {
        TASK_NAMES.get(name).map(Self)
    }

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        TASK_NAMES.resolve(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.as_str())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Ok(Self::new(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = TaskId::new("begin_frame");
        let b = TaskId::new("begin_frame");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "begin_frame");
        assert_eq!(a.to_string(), "begin_frame");
        assert_eq!(TaskId::existing("begin_frame"), Some(a));
    }

    #[test]
    fn serde_uses_names() {
        let id = TaskId::new("post_process");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"post_process\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Ordered composition of handler wrappers.
//!
//! A [`Chain`] is a list of named constructors. [`Chain::then`] wraps a terminal handler
//! right-to-left so the first constructor listed is the first to see the request.
use std::{fmt, sync::Arc};

use crate::ports::handler::SharedHandler;

/// Function turning the next handler into a wrapped one.
pub type WrapFn = Arc<dyn Fn(SharedHandler) -> SharedHandler + Send + Sync>;

/// A named chain element.
#[derive(Clone)]
pub struct Constructor {
    pub name: String,
    pub wrap: WrapFn,
}

impl Constructor {
    pub fn new<F>(name: impl Into<String>, wrap: F) -> Self
    where
        F: Fn(SharedHandler) -> SharedHandler + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            wrap: Arc::new(wrap),
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Constructor").field(&self.name).finish()
    }
}

#[derive(Clone, Default, Debug)]
pub struct Chain {
    constructors: Vec<Constructor>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, constructor: Constructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn push(&mut self, constructor: Constructor) {
        self.constructors.push(constructor);
    }

    /// A new chain running `self` first and `other` second.
    pub fn extend(&self, other: &Chain) -> Chain {
        let mut constructors = self.constructors.clone();
        constructors.extend(other.constructors.iter().cloned());
        Chain { constructors }
    }

    /// Wrap `handler` with every constructor.
    pub fn then(&self, handler: SharedHandler) -> SharedHandler {
        self.constructors
            .iter()
            .rev()
            .fold(handler, |next, constructor| (constructor.wrap)(next))
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

//! Handler registry: method name → typed invocable, built once at startup.
//!
//! Methods are registered as closures, usually capturing an `Rc` of the
//! service object they call into. Lookup is a single hash-map read; no reflection.
//!
//! ```ignore
//! let greeter = Rc::new(Greeter::default());
//! let handler = Handler::builder("hello")
//!     .method("hi", {
//!         let greeter = Rc::clone(&greeter);
//!         move |args, _kwargs| {
//!             let greeter = Rc::clone(&greeter);
//!             async move { greeter.hi(args).await }
//!         }
//!     })
//!     .build();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_lite::FutureExt;
use futures_lite::future::BoxedLocal;

use crate::message::{Failure, Kwargs, Value};

/// Outcome of one invocation.
pub type CallResult = Result<Value, Failure>;

/// A registered method. Calling it starts the invocation; the returned
/// future may suspend on cooperative I/O.
pub type Invocable = Box<dyn Fn(Vec<Value>, Kwargs) -> BoxedLocal<CallResult>>;

pub struct Handler {
    name: String,
    methods: HashMap<String, Invocable>,
}

impl Handler {
    pub fn builder(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, method: &str) -> Option<&Invocable> {
        self.methods.get(method)
    }

    /// Start `method`. A name with no registered invocable resolves to an
    /// `UnknownMethod` failure.
    pub fn invoke(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> BoxedLocal<CallResult> {
        match self.resolve(method) {
            Some(invocable) => invocable(args, kwargs),
            None => futures_lite::future::ready(Err(Failure::unknown_method(method))).boxed_local(),
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .finish()
    }
}

pub struct HandlerBuilder {
    name: String,
    methods: HashMap<String, Invocable>,
}

impl HandlerBuilder {
    /// Register a method whose body may suspend.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> Fut + 'static,
        Fut: Future<Output = CallResult> + 'static,
    {
        self.methods
            .insert(name.into(), Box::new(move |args, kwargs| f(args, kwargs).boxed_local()));
        self
    }

    /// Register a method that finishes without suspending.
    #[must_use]
    pub fn sync_method<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> CallResult + 'static,
    {
        // the body runs when the call is first polled, not when it is built
        let f = Rc::new(f);
        self.method(name, move |args, kwargs| {
            let f = Rc::clone(&f);
            async move { f(args, kwargs) }
        })
    }

    pub fn build(self) -> Handler {
        Handler {
            name: self.name,
            methods: self.methods,
        }
    }
}

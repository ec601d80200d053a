//! Name to implementation mapping for callable functions.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::function::{short_type_name, CallArgs, FunctionError, Reply};
use crate::outcome::{Failure, Outcome};

/// Kind reported when a call cannot be routed to a function.
pub const DISPATCH_ERROR: &str = "DispatchError";

/// Kind reported when a function panics.
pub const PANIC: &str = "Panic";

pub type SyncFn = Arc<dyn Fn(CallArgs) -> Result<Box<dyn Reply>, FunctionError> + Send + Sync>;

pub type TaskFn = Arc<
    dyn Fn(CallArgs) -> BoxFuture<'static, Result<Box<dyn Reply>, FunctionError>> + Send + Sync,
>;

/// How a registered function is run, fixed at registration.
#[derive(Clone)]
pub enum Invocation {
    /// Runs to completion on the calling task.
    Sync(SyncFn),
    /// Returns a future that is awaited.
    Task(TaskFn),
}

impl Invocation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::Task(_) => "task",
        }
    }

    /// Run the function, turning a panic into a failure.
    pub async fn invoke(&self, args: CallArgs) -> Result<Box<dyn Reply>, FunctionError> {
        let caught = match self {
            Self::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(args))),
            Self::Task(f) => {
                let f = Arc::clone(f);
                AssertUnwindSafe(async move { f(args).await })
                    .catch_unwind()
                    .await
            }
        };

        caught.unwrap_or_else(|payload| Err(FunctionError::new(PANIC, panic_message(&*payload))))
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Registered functions, seeded with `ping`.
///
/// Functions are registered through `&mut self` before dispatch starts and
/// looked up through `&self`.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Invocation>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register_as("ping", |_: CallArgs| Ok::<_, FunctionError>("pong"));
        registry
    }

    /// Register `f` under its item name.
    ///
    /// For a function item `fn resize(..)` the name is `resize`. Closures
    /// and fn pointers have no usable name: they are skipped with a warning
    /// and must go through [`register_as`](Self::register_as).
    pub fn register<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Result<R, FunctionError> + Send + Sync + 'static,
        R: Reply + 'static,
    {
        match item_name::<F>() {
            Some(name) => self.register_as(name, f),
            None => unnamed::<F>(self),
        }
    }

    pub fn register_as<F, R>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Result<R, FunctionError> + Send + Sync + 'static,
        R: Reply + 'static,
    {
        let f: SyncFn = Arc::new(move |args| f(args).map(|r| Box::new(r) as Box<dyn Reply>));
        self.insert(name.into(), Invocation::Sync(f))
    }

    /// Register an async function under its item name.
    pub fn register_async<F, Fut, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FunctionError>> + Send + 'static,
        R: Reply + 'static,
    {
        match item_name::<F>() {
            Some(name) => self.register_async_as(name, f),
            None => unnamed::<F>(self),
        }
    }

    pub fn register_async_as<F, Fut, R>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FunctionError>> + Send + 'static,
        R: Reply + 'static,
    {
        let f: TaskFn = Arc::new(move |args| {
            let fut = f(args);
            async move { fut.await.map(|r| Box::new(r) as Box<dyn Reply>) }.boxed()
        });
        self.insert(name.into(), Invocation::Task(f))
    }

    fn insert(&mut self, name: String, invocation: Invocation) -> &mut Self {
        info!(function = %name, kind = invocation.kind(), "registering function");
        if self.functions.insert(name.clone(), invocation).is_some() {
            debug!(function = %name, "replaced existing registration");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Invocation> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Route a call to its function and capture what happens.
    ///
    /// Routing problems and function failures both come back as
    /// [`Outcome::Failure`]; only a retry request escapes as
    /// [`Outcome::RetryRequested`].
    pub async fn dispatch(&self, function: Option<&str>, args: CallArgs) -> Outcome {
        let Some(name) = function.filter(|name| !name.is_empty()) else {
            error!("message does not contain key \"function\"");
            return Outcome::Failure(Failure::new(
                DISPATCH_ERROR,
                "message missing required field \"function\"",
            ));
        };

        let Some(invocation) = self.functions.get(name) else {
            let available = self.names();
            error!(function = %name, available = ?available, "function is not registered");
            return Outcome::Failure(Failure::new(
                DISPATCH_ERROR,
                format!(
                    "Function {name} does not exist; registered functions: {}",
                    available.join(", ")
                ),
            ));
        };

        debug!(
            function = %name,
            kind = invocation.kind(),
            args = args.args.len(),
            kwargs = args.kwargs.len(),
            "invoking function"
        );

        match invocation.invoke(args).await {
            Ok(reply) => Outcome::Success(reply),
            Err(err) => err.into(),
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_owned()
    }
}

/// Name of a function item type; `None` for closures and fn pointers.
fn item_name<F>() -> Option<&'static str> {
    if std::any::type_name::<F>().starts_with("fn(") {
        return None;
    }
    let name = short_type_name::<F>();
    let mut chars = name.chars();
    let leads = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_');
    (leads && chars.all(|c| c.is_alphanumeric() || c == '_')).then_some(name)
}

fn unnamed<F>(registry: &mut FunctionRegistry) -> &mut FunctionRegistry {
    warn!(
        type_name = std::any::type_name::<F>(),
        "function has no item name and was not registered; use register_as"
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    #[derive(Debug, thiserror::Error)]
    #[error("x")]
    struct ValueError;

    fn add(args: CallArgs) -> Result<i64, FunctionError> {
        Ok(args.arg::<i64>(0, "a")? + args.arg::<i64>(1, "b")?)
    }

    async fn slow_echo(args: CallArgs) -> Result<Value, FunctionError> {
        tokio::task::yield_now().await;
        args.arg(0, "value")
    }

    fn result_of(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Success(reply) => reply.to_json().unwrap(),
            other => panic!("expected success, got {other:?}"),
        }
    }

    fn failure_of(outcome: Outcome) -> Failure {
        match outcome {
            Outcome::Failure(failure) => failure,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    fn positional(values: Vec<Value>) -> CallArgs {
        CallArgs::new(values, Map::new())
    }

    #[tokio::test]
    async fn ping_is_built_in() {
        let registry = FunctionRegistry::new();
        assert_eq!(registry.names(), vec!["ping"]);

        let outcome = registry.dispatch(Some("ping"), CallArgs::default()).await;
        assert_eq!(result_of(outcome), json!("pong"));
    }

    #[tokio::test]
    async fn registers_under_the_item_name() {
        let mut registry = FunctionRegistry::new();
        registry.register(add).register_async(slow_echo);

        assert_eq!(registry.names(), vec!["add", "ping", "slow_echo"]);
        assert_eq!(registry.get("add").unwrap().kind(), "sync");
        assert_eq!(registry.get("slow_echo").unwrap().kind(), "task");

        let outcome = registry
            .dispatch(Some("add"), positional(vec![json!(2), json!(3)]))
            .await;
        assert_eq!(result_of(outcome), json!(5));

        let outcome = registry
            .dispatch(Some("slow_echo"), positional(vec![json!({"k": [1]})]))
            .await;
        assert_eq!(result_of(outcome), json!({"k": [1]}));
    }

    #[test]
    fn unnamed_callables_are_not_registered() {
        let mut registry = FunctionRegistry::new();
        let pointer: fn(CallArgs) -> Result<i64, FunctionError> = add;

        registry
            .register(|_: CallArgs| Ok::<_, FunctionError>(1))
            .register(pointer)
            .register_async(|_: CallArgs| async { Ok::<_, FunctionError>(2) });
        assert_eq!(registry.names(), vec!["ping"]);

        registry.register_as("add_ptr", pointer);
        assert_eq!(registry.names(), vec!["add_ptr", "ping"]);
    }

    #[test]
    fn item_names_of_callables() {
        let closure = |_: CallArgs| Ok::<_, FunctionError>(());
        assert_eq!(item_name_of(&add), Some("add"));
        assert_eq!(item_name_of(&slow_echo), Some("slow_echo"));
        assert_eq!(item_name_of(&closure), None);
        assert_eq!(
            item_name_of(&(add as fn(CallArgs) -> Result<i64, FunctionError>)),
            None
        );
    }

    fn item_name_of<F>(_: &F) -> Option<&'static str> {
        item_name::<F>()
    }

    #[tokio::test]
    async fn keyword_arguments_are_passed_through() {
        let mut registry = FunctionRegistry::new();
        registry.register(add);

        let mut kwargs = Map::new();
        kwargs.insert("b".to_owned(), json!(10));
        let outcome = registry
            .dispatch(Some("add"), CallArgs::new(vec![json!(1)], kwargs))
            .await;
        assert_eq!(result_of(outcome), json!(11));
    }

    #[tokio::test]
    async fn explicit_names_and_replacement() {
        let mut registry = FunctionRegistry::new();
        registry.register_as("answer", |_: CallArgs| Ok::<_, FunctionError>(1));
        registry.register_as("answer", |_: CallArgs| Ok::<_, FunctionError>(42));

        assert_eq!(registry.len(), 2);
        let outcome = registry.dispatch(Some("answer"), CallArgs::default()).await;
        assert_eq!(result_of(outcome), json!(42));
    }

    #[tokio::test]
    async fn unknown_function_lists_registered_names() {
        let mut registry = FunctionRegistry::new();
        registry.register(add);

        let failure = failure_of(registry.dispatch(Some("nope"), CallArgs::default()).await);
        assert_eq!(failure.kind, DISPATCH_ERROR);
        assert!(failure.message.contains("Function nope does not exist"));
        assert!(failure.message.ends_with("add, ping"));
    }

    #[tokio::test]
    async fn missing_function_is_a_dispatch_failure() {
        let registry = FunctionRegistry::new();

        for function in [None, Some("")] {
            let failure = failure_of(registry.dispatch(function, CallArgs::default()).await);
            assert_eq!(failure.kind, DISPATCH_ERROR);
            assert!(failure.message.contains("missing required field"));
        }
    }

    #[tokio::test]
    async fn function_errors_are_captured() {
        let mut registry = FunctionRegistry::new();
        registry.register_as("fails", |_: CallArgs| -> Result<(), FunctionError> {
            Err(ValueError.into())
        });

        let failure = failure_of(registry.dispatch(Some("fails"), CallArgs::default()).await);
        assert_eq!(failure.repr(), r#"ValueError("x")"#);
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let mut registry = FunctionRegistry::new();
        registry.register_as("boom", |_: CallArgs| -> Result<(), FunctionError> {
            panic!("kaboom")
        });
        registry.register_async_as("async_boom", |_: CallArgs| async {
            if true {
                panic!("async kaboom");
            }
            Ok::<_, FunctionError>(())
        });

        let failure = failure_of(registry.dispatch(Some("boom"), CallArgs::default()).await);
        assert_eq!(failure.kind, PANIC);
        assert_eq!(failure.message, "kaboom");

        let failure = failure_of(
            registry
                .dispatch(Some("async_boom"), CallArgs::default())
                .await,
        );
        assert_eq!(failure.message, "async kaboom");
    }

    #[tokio::test]
    async fn retry_requests_escape() {
        let mut registry = FunctionRegistry::new();
        registry.register_async_as("later", |_: CallArgs| async {
            Err::<(), _>(FunctionError::retry("upstream busy"))
        });

        let outcome = registry.dispatch(Some("later"), CallArgs::default()).await;
        assert!(matches!(
            outcome,
            Outcome::RetryRequested { ref reason } if reason == "upstream busy"
        ));
    }

    #[tokio::test]
    async fn argument_errors_are_failures() {
        let mut registry = FunctionRegistry::new();
        registry.register(add);

        let failure = failure_of(
            registry
                .dispatch(Some("add"), positional(vec![json!(1)]))
                .await,
        );
        assert_eq!(failure.kind, crate::function::ARGUMENT_ERROR);
    }
}

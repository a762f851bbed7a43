//! One isolated QuickJS execution.
//!
//! Every call builds a fresh runtime and context, installs the capability
//! prelude, runs the program's entry point to completion and drops
//! everything before returning.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use rquickjs::{
    CatchResultExt, CaughtError, Context, Ctx, Function, Module, Promise, Runtime, Value,
};
use tracing::debug;

use super::bridge::{self, FetchBridge, HttpTransport};
use super::{contract, SandboxLimits};
use crate::domain::{FailureKind, RunFailure, RunResult};

const PRELUDE: &str = include_str!("prelude.js");

const HARNESS: &str = r#"
(async () => {
  let entry;
  if (typeof __default_export !== 'undefined') {
    const exported = __default_export;
    if (typeof exported === 'function') {
      entry = exported;
    } else if (exported && typeof exported === 'object') {
      const key = ['collect', 'default', 'main'].find((k) => typeof exported[k] === 'function');
      if (key) entry = exported[key].bind(exported);
    }
  }
  if (!entry && typeof collect === 'function') entry = collect;
  if (!entry && typeof main === 'function') entry = main;
  if (!entry) {
    throw new Error('no entry point: export a default function or define collect() or main()');
  }
  const result = await entry();
  return JSON.stringify(result === undefined ? null : result);
})()
"#;

const STACK_LIMIT_BYTES: usize = 1024 * 1024;
const PRECHECK_MODULE: &str = "program";
const MAX_LINE_PREVIEW: usize = 120;

static STACK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":(\d+)").expect("stack line regex"));

struct JsError {
    name: Option<String>,
    message: String,
    line: Option<usize>,
}

impl JsError {
    fn from_caught(error: CaughtError<'_>) -> Self {
        match error {
            CaughtError::Exception(exception) => {
                let name = exception
                    .as_object()
                    .get::<_, Option<String>>("name")
                    .ok()
                    .flatten();
                let line = exception
                    .stack()
                    .and_then(|stack| line_from_stack(&stack))
                    .or_else(|| {
                        exception
                            .as_object()
                            .get::<_, Option<i64>>("lineNumber")
                            .ok()
                            .flatten()
                            .and_then(|n| usize::try_from(n).ok())
                    });
                Self {
                    name,
                    message: exception.message().unwrap_or_default(),
                    line,
                }
            }
            CaughtError::Value(value) => Self {
                name: None,
                message: describe_thrown_value(&value),
                line: None,
            },
            CaughtError::Error(error) => Self {
                name: None,
                message: error.to_string(),
                line: None,
            },
        }
    }

    fn is_syntax_error(&self) -> bool {
        self.name.as_deref() == Some("SyntaxError")
    }

    fn summary(&self) -> String {
        match &self.name {
            Some(name) if !self.message.is_empty() => format!("{name}: {}", self.message),
            Some(name) => name.clone(),
            None if self.message.is_empty() => "unknown error".to_string(),
            None => self.message.clone(),
        }
    }
}

fn describe_thrown_value(value: &Value<'_>) -> String {
    if let Some(s) = value.as_string().and_then(|s| s.to_string().ok()) {
        return format!("uncaught value: {s}");
    }
    if let Some(n) = value.as_number() {
        return format!("uncaught value: {n}");
    }
    format!("uncaught {:?}", value.type_of())
}

fn line_from_stack(stack: &str) -> Option<usize> {
    STACK_LINE
        .captures(stack)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn syntax_failure(program: &str, error: &JsError) -> RunFailure {
    let detail = error
        .line
        .and_then(|n| {
            program
                .lines()
                .nth(n.checked_sub(1)?)
                .map(|text| (n, text.trim()))
        })
        .map(|(n, text)| {
            let preview: String = text.chars().take(MAX_LINE_PREVIEW).collect();
            format!(" (line {n}: {preview})")
        })
        .unwrap_or_default();

    RunFailure::syntax(format!("{}{}", error.summary(), detail))
}

fn is_out_of_memory(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("out of memory") || lower.contains("allocation")
}

fn is_stack_overflow(message: &str) -> bool {
    message.to_lowercase().contains("stack overflow")
}

/// Compile the program as a module without evaluating it. No statement of
/// the program runs and no host capability exists yet.
fn precheck(ctx: &Ctx<'_>, program: &str) -> Result<(), RunFailure> {
    Module::declare(ctx.clone(), PRECHECK_MODULE, program)
        .catch(ctx)
        .map(|_| ())
        .map_err(|e| {
            let error = JsError::from_caught(e);
            if error.is_syntax_error() {
                syntax_failure(program, &error)
            } else {
                RunFailure::runtime(error.summary())
            }
        })
}

fn install_host(ctx: &Ctx<'_>, bridge: Arc<FetchBridge>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let fetch = Function::new(ctx.clone(), move |url: String, init: String| {
        bridge.handle(&url, &init)
    })?;
    globals.set("__host_fetch", fetch)?;

    let parse = Function::new(ctx.clone(), |input: String, base: String| {
        bridge::parse_url(&input, &base)
    })?;
    globals.set("__host_parse_url", parse)?;

    Ok(())
}

fn run_in_context(ctx: &Ctx<'_>, program: &str, bridge: Arc<FetchBridge>) -> Result<String, RunFailure> {
    precheck(ctx, program)?;

    install_host(ctx, bridge)
        .map_err(|e| RunFailure::runtime(format!("failed to install capabilities: {e}")))?;
    ctx.eval::<Value, _>(PRELUDE)
        .catch(ctx)
        .map_err(|e| RunFailure::runtime(format!("prelude failed: {e}")))?;

    ctx.eval::<Value, _>(program).catch(ctx).map_err(|e| {
        let error = JsError::from_caught(e);
        if error.is_syntax_error() {
            syntax_failure(program, &error)
        } else {
            RunFailure::runtime(error.summary())
        }
    })?;

    let promise: Promise = ctx
        .eval(HARNESS)
        .catch(ctx)
        .map_err(|e| RunFailure::runtime(JsError::from_caught(e).summary()))?;

    match promise.finish::<String>().catch(ctx) {
        Ok(json) => Ok(json),
        Err(CaughtError::Error(rquickjs::Error::WouldBlock)) => Err(RunFailure::runtime(
            "entry point never settled (awaiting something that cannot complete)",
        )),
        Err(e) => Err(RunFailure::runtime(JsError::from_caught(e).summary())),
    }
}

/// Compile-only pass over a normalized program in a throwaway isolate.
pub fn syntax_check(program: &str, limits: &SandboxLimits) -> Result<(), RunFailure> {
    let deadline = Instant::now() + limits.timeout;
    let runtime = isolate(limits, deadline)?;

    let context = Context::full(&runtime)
        .map_err(|e| RunFailure::runtime(format!("failed to create context: {e}")))?;
    context
        .with(|ctx| precheck(&ctx, program))
        .map_err(|failure| classify(failure, limits, deadline))
}

fn isolate(limits: &SandboxLimits, deadline: Instant) -> Result<Runtime, RunFailure> {
    let runtime = Runtime::new()
        .map_err(|e| RunFailure::runtime(format!("failed to create isolate: {e}")))?;
    runtime.set_memory_limit(limits.memory_limit_bytes);
    runtime.set_max_stack_size(STACK_LIMIT_BYTES);
    runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
    Ok(runtime)
}

/// Run an already normalized and safety-checked program.
pub fn execute(program: &str, limits: &SandboxLimits, transport: Arc<dyn HttpTransport>) -> RunResult {
    let started = Instant::now();
    let deadline = started + limits.timeout;

    let runtime = isolate(limits, deadline)?;

    let context = Context::full(&runtime)
        .map_err(|e| RunFailure::runtime(format!("failed to create context: {e}")))?;

    let bridge = Arc::new(FetchBridge::new(transport, limits, deadline));
    let outcome = context.with(|ctx| run_in_context(&ctx, program, bridge.clone()));

    debug!(
        "Isolate finished in {:?} after {} fetch call(s)",
        started.elapsed(),
        bridge.calls_made()
    );

    let json = outcome.map_err(|failure| classify(failure, limits, deadline))?;
    contract::validate(&json)
}

fn classify(failure: RunFailure, limits: &SandboxLimits, deadline: Instant) -> RunFailure {
    if failure.kind != FailureKind::Runtime && failure.kind != FailureKind::Syntax {
        return failure;
    }
    if Instant::now() >= deadline {
        return RunFailure::runtime(format!(
            "execution timed out after {}s",
            limits.timeout.as_secs_f64()
        ));
    }
    if is_out_of_memory(&failure.message) {
        return RunFailure::runtime(format!(
            "memory limit of {} MiB exceeded",
            limits.memory_limit_bytes / (1024 * 1024)
        ));
    }
    if is_stack_overflow(&failure.message) {
        return RunFailure::runtime("stack size limit exceeded");
    }
    failure
}

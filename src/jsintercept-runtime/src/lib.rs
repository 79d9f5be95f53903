//! QuickJS implementation of the jsintercept script engine interface.

mod convert;
mod globals;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Context as _, anyhow};
use jsintercept_common::{
    EngineError, FunctionHandle, HostCallback, InterruptHandle, MarshalledValue, ScriptContext,
    ScriptEngine, ThrownError,
};
use rquickjs::prelude::{Rest, This};
use rquickjs::promise::MaybePromise;
use rquickjs::{
    CaughtError, Context, Ctx, Exception, Function, Module, Persistent, Runtime, Value, qjs,
};
use tracing::{Level, instrument};

use crate::convert::{SharedHandles, from_js, thrown_from_exception, thrown_from_value, to_js};

/// Creates QuickJS contexts, each with its own runtime.
#[derive(Debug, Clone, Default)]
pub struct QuickJsEngine {
    memory_limit: Option<usize>,
    max_stack_size: Option<usize>,
    gc_after_invoke: bool,
}

impl QuickJsEngine {
    /// Create an engine with QuickJS defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the heap of every context to `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Limit the native stack used by scripts in every context to `bytes`.
    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Run a GC cycle after every invocation.
    pub fn with_gc_after_invoke(mut self, enabled: bool) -> Self {
        self.gc_after_invoke = enabled;
        self
    }
}

impl ScriptEngine for QuickJsEngine {
    type Context = QuickJsContext;

    fn create_context(&self) -> Result<QuickJsContext, EngineError> {
        QuickJsContext::new(self).map_err(|e| EngineError::Internal(format!("{e:#}")))
    }

    fn name(&self) -> &'static str {
        "quickjs"
    }
}

/// A QuickJS runtime and context with the handlers compiled into it.
pub struct QuickJsContext {
    functions: HashMap<FunctionHandle, Persistent<Function<'static>>>,
    next_function: u64,
    handles: SharedHandles,
    interrupt: InterruptHandle,
    gc_after_invoke: bool,
    // field order matters: the context must drop before the runtime
    context: Context,
    _runtime: Runtime,
}

// SAFETY:
// `rquickjs::Context` and `rquickjs::Runtime` are not `Send` because they hold raw
// pointers, and `SharedHandles` is an `Rc`. None of them is ever shared: every
// clone of the `Rc` lives either in this struct or inside a JS function owned by
// this runtime, so they always move between threads together. Every method that
// touches the runtime takes `&mut self`, and the pool hands a context to one
// thread at a time, so there are no concurrent accesses.
unsafe impl Send for QuickJsContext {}

impl QuickJsContext {
    #[instrument(skip_all, level = "debug")]
    fn new(config: &QuickJsEngine) -> anyhow::Result<Self> {
        let runtime = Runtime::new().context("Unable to initialize QuickJS runtime")?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }

        let interrupt = InterruptHandle::new();
        let flag = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || flag.is_killed())));

        let context = Context::full(&runtime).context("Unable to create JS context")?;
        context.with(|ctx| globals::setup(&ctx).catch(&ctx))?;

        Ok(Self {
            functions: HashMap::new(),
            next_function: 0,
            handles: SharedHandles::default(),
            interrupt,
            gc_after_invoke: config.gc_after_invoke,
            context,
            _runtime: runtime,
        })
    }
}

impl ScriptContext for QuickJsContext {
    #[instrument(err(Debug), skip(self, source), level = Level::DEBUG)]
    fn compile(&mut self, name: &str, source: &str) -> Result<FunctionHandle, EngineError> {
        let handle = FunctionHandle(self.next_function + 1);
        let module_name = make_module_name(name, handle);

        let func = self.context.with(|ctx| -> Result<_, EngineError> {
            anchor_stack(&ctx);
            let func = match script_form(source) {
                ScriptForm::Module { exports } => compile_module(&ctx, &module_name, source, exports),
                ScriptForm::Expression => compile_expression(&ctx, source),
            }
            .map_err(|e| EngineError::Compilation(e.to_string()))?;

            // Save the function as a Persistent so it can outlive the `with` closure.
            Ok(Persistent::save(&ctx, func))
        })?;

        self.next_function = handle.0;
        self.functions.insert(handle, func);
        Ok(handle)
    }

    #[instrument(err(Debug), skip(self, this, args, proxy), level = Level::TRACE)]
    fn invoke(
        &mut self,
        function: FunctionHandle,
        this: MarshalledValue,
        args: Vec<MarshalledValue>,
        proxy: Option<HostCallback>,
    ) -> Result<MarshalledValue, EngineError> {
        let func = self
            .functions
            .get(&function)
            .cloned()
            .ok_or(EngineError::UnknownFunction(function))?;

        self.handles.borrow_mut().prune();

        let handles = self.handles.clone();
        let gc = self.gc_after_invoke;
        let result = self.context.with(|ctx| -> Result<MarshalledValue, EngineError> {
            anchor_stack(&ctx);
            let _gc_guard = MaybeRunGcGuard::new(gc, &ctx);

            let func = func
                .restore(&ctx)
                .map_err(|e| EngineError::Internal(e.to_string()))?;

            let this = to_js(&ctx, &handles, this).map_err(conversion)?;
            let mut js_args = Vec::with_capacity(args.len() + 1);
            for arg in args {
                js_args.push(to_js(&ctx, &handles, arg).map_err(conversion)?);
            }

            let _proxy_guard = match proxy {
                Some(callback) => {
                    let (proxy, guard) =
                        install_proxy(&ctx, &handles, callback).map_err(conversion)?;
                    js_args.push(proxy.into_value());
                    Some(guard)
                }
                None => None,
            };

            // If the handler returned a promise that resolves immediately, we resolve it.
            let promise: MaybePromise = func
                .call((This(this), Rest(js_args)))
                .catch_thrown(&ctx)
                .map_err(EngineError::Thrown)?;
            let value: Value = promise
                .finish()
                .catch_thrown(&ctx)
                .map_err(EngineError::Thrown)?;

            from_js(&handles, value).map_err(|e| EngineError::Conversion(e.0))
        });

        match result {
            Err(EngineError::Thrown(_) | EngineError::Internal(_)) if self.interrupt.is_killed() => {
                Err(EngineError::Interrupted)
            }
            other => other,
        }
    }

    fn release(&mut self, function: FunctionHandle) -> bool {
        self.functions.remove(&function).is_some()
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

impl Drop for QuickJsContext {
    fn drop(&mut self) {
        // drop Persistent references before the Context, otherwise the runtime
        // aborts on drop due to the leak.
        self.functions.clear();
        self.handles.borrow_mut().clear();
    }
}

fn conversion(err: rquickjs::Error) -> EngineError {
    EngineError::Conversion(err.to_string())
}

// QuickJS measures stack usage against the stack top recorded when the
// runtime was created. A pooled context is driven from whichever thread holds
// the lease, so the top must be re-recorded on the calling thread before any
// script runs. Host callbacks run nested inside an invocation on the same
// thread and are covered by the invocation's anchor.
fn anchor_stack(ctx: &Ctx<'_>) {
    // SAFETY: `ctx` is a live context borrowed from `Context::with`, so its
    // runtime pointer is valid for the duration of the call, and the runtime is
    // only ever used by the thread currently running `with`.
    unsafe {
        let runtime = qjs::JS_GetRuntime(ctx.as_raw().as_ptr());
        qjs::JS_UpdateStackTop(runtime);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptForm {
    /// A single expression evaluating to the handler function.
    Expression,
    /// A module declaring `function handler` at the top level. `exports` is
    /// set when the module has its own `export` statements.
    Module { exports: bool },
}

// Scripts with a top-level `export` statement or `function handler`
// declaration are modules. Everything else is an expression. Only top-level
// tokens count: strings, comments and anything nested inside brackets are
// skipped, so `(s) => s + ' exported'` stays an expression.
fn script_form(source: &str) -> ScriptForm {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut exports = false;
    let mut declares_handler = false;
    let mut after_function = false;
    let mut after_dot = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = find_from(bytes, i + 2, b"\n").unwrap_or(bytes.len());
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |end| end + 2);
                continue;
            }
            b'\'' | b'"' | b'`' => {
                i = skip_string(bytes, i);
                after_function = false;
                after_dot = false;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            _ if is_ident_byte(b) => {
                let start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                let word = &source[start..i];
                if depth == 0 && !after_dot {
                    match word {
                        "export" => exports = true,
                        "handler" if after_function => declares_handler = true,
                        _ => {}
                    }
                }
                after_function = word == "function";
                after_dot = false;
                continue;
            }
            _ => {}
        }
        after_function = false;
        after_dot = b == b'.';
        i += 1;
    }

    if exports || declares_handler {
        ScriptForm::Module { exports }
    } else {
        ScriptForm::Expression
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || !b.is_ascii()
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

// Returns the index just past the closing quote.
fn skip_string(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn compile_module<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    source: &str,
    exports: bool,
) -> Result<Function<'js>, ThrownError> {
    // If the handler script doesn't export anything itself, we export the handler for the user.
    let source = if exports {
        source.to_owned()
    } else {
        format!("{source}\nexport {{ handler }};")
    };

    let module = Module::declare(ctx.clone(), name, source).catch_thrown(ctx)?;
    let (module, promise) = module.eval().catch_thrown(ctx)?;
    promise.finish::<()>().catch_thrown(ctx)?;

    module.get("handler").catch_thrown(ctx)
}

fn compile_expression<'js>(ctx: &Ctx<'js>, source: &str) -> Result<Function<'js>, ThrownError> {
    let value: Value = ctx.eval(source.to_owned()).catch_thrown(ctx)?;
    let kind = value.type_name();
    value.into_function().ok_or_else(|| {
        ThrownError::new(
            "TypeError",
            format!("script evaluated to {kind}, expected a function"),
        )
    })
}

fn make_module_name(name: &str, handle: FunctionHandle) -> String {
    let name = if name.is_empty() { "handler" } else { name };
    let mut module_name = name.replace('\\', "/");
    if let Some(stripped) = module_name.strip_suffix(".js") {
        module_name = stripped.to_owned();
    }
    format!("{module_name}#{}.js", handle.0)
}

type ProxySlot = Rc<RefCell<Option<HostCallback>>>;

// Drops the host callback once the invocation is over, so a script that kept a
// reference to the proxy gets an exception instead of reaching the host.
struct ProxyGuard(ProxySlot);

impl Drop for ProxyGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.0.try_borrow_mut() {
            slot.take();
        }
    }
}

fn install_proxy<'js>(
    ctx: &Ctx<'js>,
    handles: &SharedHandles,
    callback: HostCallback,
) -> rquickjs::Result<(Function<'js>, ProxyGuard)> {
    let slot: ProxySlot = Rc::new(RefCell::new(Some(callback)));
    let inner = slot.clone();
    let handles = handles.clone();

    let proxy = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let mut marshalled = Vec::with_capacity(args.len());
            for arg in args.into_inner() {
                let value = from_js(&handles, arg).map_err(|e| Exception::throw_type(&ctx, &e.0))?;
                marshalled.push(value);
            }

            let result = {
                let mut slot = inner.try_borrow_mut().map_err(|_| {
                    Exception::throw_internal(&ctx, "original method proxy is already running")
                })?;
                let Some(callback) = slot.as_mut() else {
                    return Err(Exception::throw_internal(
                        &ctx,
                        "original method proxy is no longer valid",
                    ));
                };
                callback(marshalled)
            };

            match result {
                Ok(value) => to_js(&ctx, &handles, value),
                Err(thrown) => {
                    let error = to_js(&ctx, &handles, MarshalledValue::Error(thrown))?;
                    Err(ctx.throw(error))
                }
            }
        },
    )?
    .with_name("original")?;

    Ok((proxy, ProxyGuard(slot)))
}

trait CatchJsErrorExt {
    type Ok;
    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<Self::Ok>;
    fn catch_thrown(self, ctx: &Ctx<'_>) -> Result<Self::Ok, ThrownError>;
}

impl<T> CatchJsErrorExt for rquickjs::Result<T> {
    type Ok = T;

    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<T> {
        self.catch_thrown(ctx)
            .map_err(|e| anyhow!("Runtime error: {e}"))
    }

    fn catch_thrown(self, ctx: &Ctx<'_>) -> Result<T, ThrownError> {
        match rquickjs::CatchResultExt::catch(self, ctx) {
            Ok(value) => Ok(value),
            Err(CaughtError::Exception(exception)) => Err(thrown_from_exception(&exception)),
            Err(CaughtError::Value(value)) => Err(thrown_from_value(&value)),
            Err(CaughtError::Error(error)) => Err(ThrownError::new("InternalError", error.to_string())),
        }
    }
}

// RAII guard that runs a GC cycle when dropped if `run_gc` is true.
struct MaybeRunGcGuard<'a> {
    run_gc: bool,
    ctx: Ctx<'a>,
}

impl<'a> MaybeRunGcGuard<'a> {
    fn new(run_gc: bool, ctx: &Ctx<'a>) -> Self {
        Self {
            run_gc,
            ctx: ctx.clone(),
        }
    }
}

impl Drop for MaybeRunGcGuard<'_> {
    fn drop(&mut self) {
        if self.run_gc {
            self.ctx.run_gc();
        }
    }
}

use rquickjs::object::Property;
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function, Object};

fn join(txt: Rest<Coerced<String>>) -> String {
    txt.into_inner()
        .into_iter()
        .map(|c| c.0)
        .collect::<Vec<_>>()
        .join(" ")
}

#[rquickjs::function]
fn log(txt: Rest<Coerced<String>>) {
    tracing::info!(target: "jsintercept::script", "{}", join(txt));
}

#[rquickjs::function]
fn debug(txt: Rest<Coerced<String>>) {
    tracing::debug!(target: "jsintercept::script", "{}", join(txt));
}

#[rquickjs::function]
fn warn(txt: Rest<Coerced<String>>) {
    tracing::warn!(target: "jsintercept::script", "{}", join(txt));
}

#[rquickjs::function]
fn error(txt: Rest<Coerced<String>>) {
    tracing::error!(target: "jsintercept::script", "{}", join(txt));
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    // Setup `console`. Script output goes to the host's tracing subscriber.
    let console = Object::new(ctx.clone())?;
    console.set("log", Function::new(ctx.clone(), js_log)?.with_name("log")?)?;
    console.set("info", Function::new(ctx.clone(), js_log)?.with_name("info")?)?;
    console.set("debug", Function::new(ctx.clone(), js_debug)?.with_name("debug")?)?;
    console.set("warn", Function::new(ctx.clone(), js_warn)?.with_name("warn")?)?;
    console.set("error", Function::new(ctx.clone(), js_error)?.with_name("error")?)?;
    globals.prop("console", Property::from(console))?;

    Ok(())
}

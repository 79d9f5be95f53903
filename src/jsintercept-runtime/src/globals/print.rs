use std::io::Write as _;

use rquickjs::object::Property;
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function};

#[rquickjs::function]
fn print(txt: Rest<Coerced<String>>) {
    let line = txt
        .into_inner()
        .into_iter()
        .map(|c| c.0)
        .collect::<Vec<_>>()
        .join(" ");
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    // Setup `print` function.
    globals.prop(
        "print",
        Property::from(Function::new(ctx.clone(), js_print)?.with_name("print")?),
    )?;

    Ok(())
}

use jsintercept_common::Sentinel;
use rquickjs::object::Property;
use rquickjs::{Ctx, Function, Value};

// Sentinels are registry symbols, so `Symbol.for("jsintercept.skipOriginal")`
// compares equal to the global. The globals are neither writable nor configurable.
pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let symbol_for: Function = ctx.eval("Symbol.for")?;

    for sentinel in [Sentinel::SkipOriginal, Sentinel::PassThrough] {
        let symbol: Value = symbol_for.call((sentinel.symbol_key(),))?;
        globals.prop(sentinel.global_name(), Property::from(symbol))?;
    }

    Ok(())
}

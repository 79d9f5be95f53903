use rquickjs::Ctx;

mod console;
mod print;
mod sentinels;

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    sentinels::setup(ctx)?;
    print::setup(ctx)?;
    console::setup(ctx)?;
    Ok(())
}

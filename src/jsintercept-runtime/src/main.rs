use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use jsintercept_common::{MarshalledValue, ScriptContext as _, ScriptEngine as _};
use jsintercept_runtime::QuickJsEngine;
use serde_json::Value as JsonValue;
use tracing::instrument;
use tracing_subscriber::EnvFilter;

const EXAMPLES: &str = "\u{001b}[1;4mExamples:\u{001b}[0m
  Run an interception handler located at ./twice.js with the arguments [21]:
    $ cat ./twice.js
    (value) => value * 2

    $ jsintercept-runtime ./twice.js '[21]'
    Handler result: 42

  Handlers declared as a function named `handler` are compiled as modules:
    $ cat ./greet.js
    function handler(name) {
        console.log(`greeting ${name}`);
        return `hello ${name}`;
    }

    $ jsintercept-runtime ./greet.js '[\"world\"]'
    Handler result: \"hello world\"
";

/// Run an interception handler script outside of a host, the way the dispatcher would invoke it.
///
/// The arguments are given as a JSON array and passed positionally to the handler.
/// Objects cannot be passed, since scripts only ever see host objects as opaque references.
#[derive(clap::Parser)]
#[command(version, about)]
#[clap(after_help = EXAMPLES)]
struct Cli {
    /// The path to the JavaScript handler script file.
    file: PathBuf,

    /// The handler arguments as a JSON array.
    #[arg(default_value = "[]")]
    args: String,
}

fn to_marshalled(json: JsonValue) -> Result<MarshalledValue> {
    Ok(match json {
        JsonValue::Null => MarshalledValue::Null,
        JsonValue::Bool(b) => MarshalledValue::Boolean(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => MarshalledValue::Integer(i),
            None => MarshalledValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => MarshalledValue::String(s),
        JsonValue::Array(items) => MarshalledValue::Array(
            items
                .into_iter()
                .map(to_marshalled)
                .collect::<Result<_>>()?,
        ),
        JsonValue::Object(_) => bail!("JSON objects cannot be passed to a handler"),
    })
}

#[instrument(skip_all, level = "info")]
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli { file, args } = Cli::parse();

    let handler_script = fs::read_to_string(&file)
        .with_context(|| format!("Reading handler script from {:?}", file))?;

    let args = match serde_json::from_str(&args).context("Parsing handler arguments")? {
        JsonValue::Array(items) => items
            .into_iter()
            .map(to_marshalled)
            .collect::<Result<Vec<_>>>()?,
        other => bail!("handler arguments must be a JSON array, got {other}"),
    };

    let mut context = QuickJsEngine::new().create_context()?;
    let name = file.display().to_string();
    let handler = context.compile(&name, &handler_script)?;

    let result = context.invoke(handler, MarshalledValue::Null, args, None)?;
    println!("Handler result: {result}");

    Ok(())
}

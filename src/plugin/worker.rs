//! Per-plugin worker thread.
//!
//! Each plugin owns a dedicated OS thread running a single-threaded tokio
//! runtime and its own Lua VM. Commands arrive over an unbounded channel and
//! are processed one at a time, so a plugin's reducer never runs twice
//! concurrently while different plugins run in parallel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};
use tokio::sync::{mpsc, oneshot};

use super::{codec, log as plugin_log, PluginError};
use crate::irc::Tags;

/// Work item for a plugin worker.
#[derive(Debug)]
pub(crate) enum Command {
    /// Run `state = reducer(state, action)`.
    Dispatch {
        action: serde_json::Value,
        reply: oneshot::Sender<Result<(), PluginError>>,
    },
    /// Current state as JSON.
    State {
        reply: oneshot::Sender<Result<serde_json::Value, PluginError>>,
    },
    /// Replace the state with a decoded snapshot.
    Restore {
        state: serde_json::Value,
        reply: oneshot::Sender<Result<(), PluginError>>,
    },
}

/// What to load.
#[derive(Debug, Clone)]
pub(crate) struct WorkerSpec {
    pub name: String,
    pub entry: PathBuf,
    pub reducer: String,
}

/// Spawn the worker thread and wait until the plugin is loaded.
///
/// Resolves with the command sender, the thread handle and the initial
/// state once the reducer passed its checks.
pub(crate) async fn spawn(
    spec: WorkerSpec,
) -> Result<
    (
        mpsc::UnboundedSender<Command>,
        std::thread::JoinHandle<()>,
        serde_json::Value,
    ),
    PluginError,
> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let name = spec.name.clone();
    let thread = std::thread::Builder::new()
        .name(format!("plugin-{name}"))
        .spawn(move || run(spec, ready_tx, rx))
        .map_err(|e| PluginError::load(&name, format!("Failed to spawn worker thread: {e}")))?;

    match ready_rx.await {
        Ok(Ok(initial)) => Ok((tx, thread, initial)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PluginError::load(&name, "worker exited during load")),
    }
}

fn run(
    spec: WorkerSpec,
    ready: oneshot::Sender<Result<serde_json::Value, PluginError>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(PluginError::load(
                &spec.name,
                format!("Failed to create tokio runtime: {e}"),
            )));
            return;
        }
    };

    rt.block_on(async move {
        let (lua, reducer, mut state) = match load(&spec).await {
            Ok(loaded) => loaded,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let initial = match codec::lua_to_json(&state) {
            Ok(initial) => initial,
            Err(e) => {
                let _ = ready.send(Err(PluginError::load(
                    &spec.name,
                    format!("initial state is not serializable: {e}"),
                )));
                return;
            }
        };
        if ready.send(Ok(initial)).is_err() {
            return;
        }

        while let Some(command) = rx.recv().await {
            match command {
                Command::Dispatch { action, reply } => {
                    let result = step(&lua, &reducer, &mut state, &action)
                        .await
                        .map_err(|reason| PluginError::dispatch(&spec.name, reason));
                    let _ = reply.send(result);
                }
                Command::State { reply } => {
                    let result = codec::lua_to_json(&state)
                        .map_err(|e| PluginError::serialize(&spec.name, e.to_string()));
                    let _ = reply.send(result);
                }
                Command::Restore { state: snapshot, reply } => {
                    let result = match codec::json_to_lua(&lua, &snapshot) {
                        Ok(Value::Nil) => Err(PluginError::serialize(&spec.name, "state cannot be null")),
                        Ok(value) => {
                            state = value;
                            Ok(())
                        }
                        Err(e) => Err(PluginError::serialize(&spec.name, e.to_string())),
                    };
                    let _ = reply.send(result);
                }
            }
        }

        log::debug!("[plugin] {} worker stopped", spec.name);
    });
}

/// Build the VM, evaluate the module, check the reducer, compute the
/// initial state.
async fn load(spec: &WorkerSpec) -> Result<(Lua, Function, Value), PluginError> {
    let fail = |reason: String| PluginError::load(&spec.name, reason);

    // SAFETY: the debug library is only used to inspect the reducer's
    // parameter list and is removed from globals before the module is
    // evaluated.
    let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE | StdLib::DEBUG, LuaOptions::default()) };

    plugin_log::register(&lua, &spec.name).map_err(|e| fail(format!("{e:#}")))?;
    register_host_api(&lua).map_err(|e| fail(e.to_string()))?;
    set_package_path(&lua, &spec.entry).map_err(|e| fail(e.to_string()))?;
    disable_native_modules(&lua).map_err(|e| fail(e.to_string()))?;

    let source = std::fs::read(&spec.entry)
        .map_err(|e| fail(format!("cannot read {}: {e}", spec.entry.display())))?;

    let debug: Value = lua.globals().get("debug").map_err(|e| fail(e.to_string()))?;
    lua.globals()
        .set("debug", Value::Nil)
        .map_err(|e| fail(e.to_string()))?;

    let module: Value = lua
        .load(&source[..])
        .set_name(format!("@{}", spec.entry.display()))
        .eval_async()
        .await
        .map_err(|e| fail(format!("module failed to evaluate: {e}")))?;

    let Value::Table(module) = module else {
        return Err(fail(format!(
            "module must return a table, got {}",
            module.type_name()
        )));
    };

    let export: Value = module
        .get(spec.reducer.as_str())
        .map_err(|e| fail(e.to_string()))?;
    let Value::Function(reducer) = export else {
        return Err(fail(format!(
            "export `{}` must be a function, got {}",
            spec.reducer,
            export.type_name()
        )));
    };

    check_arity(&debug, &reducer).map_err(fail)?;

    let initial: Value = reducer
        .call_async((Value::Nil, Value::Nil))
        .await
        .map_err(|e| fail(format!("reducer failed on initial call: {e}")))?;
    if initial.is_nil() {
        return Err(fail("reducer returned nil for the initial state".to_string()));
    }

    Ok((lua, reducer, initial))
}

/// Require exactly two declared parameters and no varargs.
fn check_arity(debug: &Value, reducer: &Function) -> Result<(), String> {
    let Value::Table(debug) = debug else {
        return Err("debug library unavailable".to_string());
    };
    let getinfo: Function = debug.get("getinfo").map_err(|e| e.to_string())?;
    let info: Table = getinfo
        .call((reducer.clone(), "u"))
        .map_err(|e| e.to_string())?;
    let params: i64 = info.get("nparams").map_err(|e| e.to_string())?;
    let vararg: bool = info.get("isvararg").map_err(|e| e.to_string())?;

    if params != 2 || vararg {
        return Err(format!(
            "reducer must take exactly 2 parameters (state, action), found {params}{}",
            if vararg { " and varargs" } else { "" }
        ));
    }
    Ok(())
}

/// One reducer step; the state is left untouched on failure.
async fn step(
    lua: &Lua,
    reducer: &Function,
    state: &mut Value,
    action: &serde_json::Value,
) -> Result<(), String> {
    let action = codec::json_to_lua(lua, action).map_err(|e| e.to_string())?;
    let next: Value = reducer
        .call_async((state.clone(), action))
        .await
        .map_err(|e| e.to_string())?;
    if next.is_nil() {
        return Err("reducer returned nil".to_string());
    }
    *state = next;
    Ok(())
}

/// `timer.sleep(ms)` and `chat.decode_tags(blob)`.
fn register_host_api(lua: &Lua) -> mlua::Result<()> {
    let timer = lua.create_table()?;
    let sleep = lua.create_async_function(|_, ms: u64| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    })?;
    timer.set("sleep", sleep)?;
    lua.globals().set("timer", timer)?;

    let chat = lua.create_table()?;
    let decode_tags = lua.create_function(|lua, blob: String| {
        let table = lua.create_table()?;
        for (key, value) in Tags::decode(&blob).iter() {
            table.set(key, value)?;
        }
        Ok(table)
    })?;
    chat.set("decode_tags", decode_tags)?;
    lua.globals().set("chat", chat)?;

    Ok(())
}

/// Let plugins `require` modules next to their entry point.
/// Plugins may only `require` Lua sources: no `loadlib`, no C searchers.
///
/// Needed because the VM is built outside mlua's safe mode to reach
/// `debug.getinfo`.
fn disable_native_modules(lua: &Lua) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    package.set("loadlib", Value::Nil)?;
    package.set("cpath", "")?;

    // preload and Lua-file searchers only
    let searchers: Table = package.get("searchers")?;
    let lua_only = lua.create_sequence_from([
        searchers.get::<Value>(1)?,
        searchers.get::<Value>(2)?,
    ])?;
    package.set("searchers", lua_only)
}

fn set_package_path(lua: &Lua, entry: &Path) -> mlua::Result<()> {
    let Some(dir) = entry.parent() else {
        return Ok(());
    };
    let package: Table = lua.globals().get("package")?;
    let current: String = package.get("path")?;
    let dir = dir.display();
    package.set("path", format!("{dir}/?.lua;{dir}/?/init.lua;{current}"))
}

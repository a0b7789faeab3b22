//! V8-backed [`Evaluator`] using `deno_core`.
//!
//! `JsRuntime` is not `Send`, so it lives on a dedicated thread. Jobs reach
//! it over a channel and answers come back on a oneshot, which keeps the
//! async import pipeline free to run on any tokio worker.

use super::{EvalError, Evaluator, ModuleCode, ModuleJob};
use crate::builtins::BUILTINS;
use crate::config::RuntimeConfig;
use crossbeam_channel::{Receiver, Sender};
use deno_core::error::{generic_error, AnyError, JsError};
use deno_core::{extension, op2, v8, JsRuntime, RuntimeOptions as DenoRuntimeOptions};
use futures::future::{BoxFuture, FutureExt};
use sandnode_util::vpath;
use std::borrow::Cow;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

extension!(
    sandnode_engine,
    ops = [op_sandnode_log, op_sandnode_path, op_sandnode_path_is_absolute],
);

/// Module records, `require` and the builtin stand-ins.
const BOOTSTRAP_JS: &str = include_str!("bootstrap.js");

/// `console.*` output, routed to tracing.
#[op2(fast)]
fn op_sandnode_log(#[string] level: &str, #[string] message: &str) {
    match level {
        "warn" => warn!(target: "sandnode::console", "{message}"),
        "debug" => debug!(target: "sandnode::console", "{message}"),
        _ => info!(target: "sandnode::console", "{message}"),
    }
}

/// `path.<func>(...parts)` over virtual paths.
#[op2]
#[string]
fn op_sandnode_path(#[string] func: &str, #[serde] parts: Vec<String>) -> Result<String, AnyError> {
    let first = parts.first().map_or("", String::as_str);
    Ok(match func {
        "join" => vpath::join_all(parts.iter().map(String::as_str)),
        "resolve" => parts
            .iter()
            .fold(String::from("/"), |base, part| vpath::resolve(&base, part)),
        "dirname" => vpath::dirname(first),
        "basename" => vpath::basename(first).to_string(),
        "extname" => vpath::extname(first).to_string(),
        "normalize" => vpath::normalize(first),
        other => return Err(generic_error(format!("path.{other} is not supported"))),
    })
}

#[op2(fast)]
fn op_sandnode_path_is_absolute(#[string] path: &str) -> bool {
    vpath::is_absolute(path)
}

enum Request {
    Evaluate {
        job: ModuleJob,
        reply: oneshot::Sender<Result<(), EvalError>>,
    },
    Exports {
        key: String,
        reply: oneshot::Sender<Result<serde_json::Value, EvalError>>,
    },
    Forget(String),
}

/// Handle to an engine thread. The thread exits when the last handle drops.
pub struct JsEngine {
    requests: Sender<Request>,
}

impl JsEngine {
    /// Start an engine whose builtins reflect `config`.
    ///
    /// # Errors
    /// Returns [`EvalError::Engine`] if the thread cannot be spawned or the
    /// bootstrap script fails.
    pub fn start(config: &RuntimeConfig) -> Result<Self, EvalError> {
        let settings = serde_json::json!({
            "nodeEnv": config.node_env,
            "cwd": config.work_dir,
            "builtins": BUILTINS,
        })
        .to_string();
        let (requests, inbox) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        std::thread::Builder::new()
            .name("sandnode-engine".to_string())
            .spawn(move || match bootstrap(&settings) {
                Ok(runtime) => {
                    let _ = ready_tx.send(Ok(()));
                    serve(runtime, &inbox);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| EvalError::engine(format!("failed to spawn engine thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| EvalError::engine("engine thread exited during startup"))??;
        debug!("javascript engine started");
        Ok(Self { requests })
    }

    fn stopped() -> EvalError {
        EvalError::engine("engine thread stopped")
    }
}

impl Evaluator for JsEngine {
    fn evaluate(&self, job: ModuleJob) -> BoxFuture<'static, Result<(), EvalError>> {
        let (reply, answer) = oneshot::channel();
        let sent = self.requests.send(Request::Evaluate { job, reply }).is_ok();
        async move {
            if !sent {
                return Err(Self::stopped());
            }
            answer.await.map_err(|_| Self::stopped())?
        }
        .boxed()
    }

    fn exports(&self, key: &str) -> BoxFuture<'static, Result<serde_json::Value, EvalError>> {
        let (reply, answer) = oneshot::channel();
        let sent = self
            .requests
            .send(Request::Exports {
                key: key.to_string(),
                reply,
            })
            .is_ok();
        async move {
            if !sent {
                return Err(Self::stopped());
            }
            answer.await.map_err(|_| Self::stopped())?
        }
        .boxed()
    }

    fn forget(&self, key: &str) {
        let _ = self.requests.send(Request::Forget(key.to_string()));
    }
}

fn bootstrap(settings: &str) -> Result<JsRuntime, EvalError> {
    let mut runtime = JsRuntime::new(DenoRuntimeOptions {
        extensions: vec![sandnode_engine::init_ops()],
        ..Default::default()
    });
    runtime
        .execute_script("<sandnode:bootstrap>", BOOTSTRAP_JS.to_string())
        .map_err(|e| EvalError::engine(format!("bootstrap failed: {e}")))?;
    runtime
        .execute_script(
            "<sandnode:configure>",
            format!("__sandnode.configure({settings});"),
        )
        .map_err(|e| EvalError::engine(format!("bootstrap failed: {e}")))?;
    Ok(runtime)
}

fn serve(mut runtime: JsRuntime, inbox: &Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Evaluate { job, reply } => {
                trace!(key = %job.key, "engine evaluating");
                let _ = reply.send(evaluate(&mut runtime, &job));
            }
            Request::Exports { key, reply } => {
                let _ = reply.send(snapshot(&mut runtime, &key));
            }
            Request::Forget(key) => {
                let result = js_string(&key).and_then(|literal| {
                    runtime
                        .execute_script("<sandnode:forget>", format!("__sandnode.forget({literal});"))
                        .map(drop)
                        .map_err(|e| EvalError::engine(e.to_string()))
                });
                if let Err(e) = result {
                    warn!(key, error = %e, "failed to drop module record");
                }
            }
        }
    }
    trace!("engine thread exiting");
}

fn evaluate(runtime: &mut JsRuntime, job: &ModuleJob) -> Result<(), EvalError> {
    let script = match &job.code {
        ModuleCode::CommonJs(source) => wrap(job, source)?,
        ModuleCode::Json(text) => format!(
            "__sandnode.define({}, JSON.parse({}));",
            js_string(&job.key)?,
            js_string(text)?
        ),
    };
    runtime
        .execute_script("<sandnode:module>", script)
        .map(drop)
        .map_err(|e| exception(&e, &job.path))
}

/// Function-scope wrapper. The body starts on the first line so reported
/// line numbers match the file.
fn wrap(job: &ModuleJob, source: &str) -> Result<String, EvalError> {
    let body = match source.strip_prefix("#!") {
        Some(rest) => Cow::Owned(format!("//{rest}")),
        None => Cow::Borrowed(source),
    };
    let requires =
        serde_json::to_string(&job.requires).map_err(|e| EvalError::engine(e.to_string()))?;
    Ok(format!(
        "__sandnode.run({key}, {path}, {requires}, function (require, module, exports, \
         builtins, process, Buffer, __filename, __dirname) {{{body}\n}});\n//# sourceURL={url}",
        key = js_string(&job.key)?,
        path = js_string(&job.path)?,
        url = job.path,
    ))
}

fn snapshot(runtime: &mut JsRuntime, key: &str) -> Result<serde_json::Value, EvalError> {
    let script = format!("__sandnode.snapshot({});", js_string(key)?);
    let value = runtime
        .execute_script("<sandnode:snapshot>", script)
        .map_err(|e| exception(&e, key))?;
    let text = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        local.to_rust_string_lossy(scope)
    };
    serde_json::from_str(&text).map_err(|e| EvalError::engine(e.to_string()))
}

/// `text` as a JavaScript string literal.
fn js_string(text: &str) -> Result<String, EvalError> {
    serde_json::to_string(text).map_err(|e| EvalError::engine(e.to_string()))
}

/// Message and line of a thrown value, preferring a frame in `path`.
fn exception(err: &AnyError, path: &str) -> EvalError {
    let Some(js) = err.downcast_ref::<JsError>() else {
        return EvalError::engine(err.to_string());
    };
    let line = js
        .frames
        .iter()
        .find(|frame| frame.file_name.as_deref() == Some(path))
        .or_else(|| js.frames.first())
        .and_then(|frame| frame.line_number)
        .and_then(|line| u32::try_from(line).ok());
    EvalError::Exception {
        message: js.exception_message.clone(),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Binding;
    use std::collections::BTreeMap;

    fn engine() -> JsEngine {
        let config = RuntimeConfig::default()
            .with_work_dir("/app")
            .with_node_env("production");
        JsEngine::start(&config).unwrap()
    }

    fn job(key: &str, source: &str, requires: &[(&str, Binding)]) -> ModuleJob {
        ModuleJob {
            key: key.to_string(),
            path: format!("/{key}"),
            code: ModuleCode::CommonJs(source.to_string()),
            requires: requires
                .iter()
                .map(|(s, b)| ((*s).to_string(), b.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_runs_plain_javascript() {
        let engine = engine();
        let source = "'use strict';\n\
            function add(a, b) { return a + b }\n\
            if (process.env.NODE_ENV === 'production') {\n\
              module.exports = { sum: add(2, 3), mode: 'prod' };\n\
            } else {\n\
              module.exports = { mode: 'dev' };\n\
            }\n";
        engine.evaluate(job("m.js", source, &[])).await.unwrap();
        let exports = engine.exports("m.js").await.unwrap();
        assert_eq!(exports, serde_json::json!({ "sum": 5, "mode": "prod" }));
    }

    #[tokio::test]
    async fn test_require_table_and_builtins() {
        let engine = engine();
        engine
            .evaluate(job("dep.js", "exports.name = 'dep';", &[]))
            .await
            .unwrap();
        let source = "var dep = require('./dep');\n\
            var path = require('node:path');\n\
            exports.name = dep.name;\n\
            exports.same = dep === require('./dep/');\n\
            exports.joined = path.join('/a', 'b/../c');\n\
            exports.base = require('path').basename('/x/y.js', '.js');\n\
            exports.cwd = process.cwd();\n\
            exports.disabled = require('fs-extra');\n\
            exports.file = __filename;\n\
            exports.dir = __dirname;\n";
        let requires = [
            ("./dep", Binding::Module("dep.js".into())),
            ("path", Binding::Builtin("path".into())),
            ("fs-extra", Binding::Disabled),
        ];
        engine
            .evaluate(job("lib/main.js", source, &requires))
            .await
            .unwrap();
        let exports = engine.exports("lib/main.js").await.unwrap();
        assert_eq!(exports["name"], "dep");
        assert_eq!(exports["same"], true);
        assert_eq!(exports["joined"], "/a/c");
        assert_eq!(exports["base"], "y");
        assert_eq!(exports["cwd"], "/app");
        assert_eq!(exports["disabled"], serde_json::json!({}));
        assert_eq!(exports["file"], "/lib/main.js");
        assert_eq!(exports["dir"], "/lib");
    }

    #[tokio::test]
    async fn test_thrown_error_reports_line() {
        let engine = engine();
        let err = engine
            .evaluate(job("bad.js", "var x = 1;\nthrow new Error('nope');\n", &[]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::Exception {
                message: "Uncaught Error: nope".into(),
                line: Some(2),
            }
        );

        let err = engine
            .evaluate(job("missing.js", "require('left-pad');", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot find module 'left-pad'"));

        let err = engine
            .evaluate(job("syntax.js", "var = ;", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SyntaxError"), "{err}");
    }

    #[tokio::test]
    async fn test_cycle_placeholder_sees_replacement() {
        let engine = engine();
        // b runs first, holding a's not-yet-evaluated record.
        engine
            .evaluate(job(
                "b.js",
                "var a = require('./a');\nexports.a = a;\n",
                &[("./a", Binding::Module("a.js".into()))],
            ))
            .await
            .unwrap();
        engine
            .evaluate(job(
                "a.js",
                "module.exports = { name: 'a', b: require('./b') };\n",
                &[("./b", Binding::Module("b.js".into()))],
            ))
            .await
            .unwrap();
        let b = engine.exports("b.js").await.unwrap();
        assert_eq!(b["a"]["name"], "a");
        assert_eq!(b["a"]["b"], "[Circular]");
    }

    #[tokio::test]
    async fn test_json_module_and_forget() {
        let engine = engine();
        let json = ModuleJob {
            code: ModuleCode::Json(r#"{"version":"1.2.3","list":[1,2]}"#.into()),
            ..job("data.json", "", &[])
        };
        engine.evaluate(json).await.unwrap();
        assert_eq!(engine.exports("data.json").await.unwrap()["version"], "1.2.3");

        engine.forget("data.json");
        assert_eq!(engine.exports("data.json").await.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_builtin_snapshot_and_hashbang() {
        let engine = engine();
        let process = engine.exports("node:process").await.unwrap();
        assert_eq!(process["env"]["NODE_ENV"], "production");
        assert_eq!(process["browser"], true);
        assert_eq!(process["cwd"], "[Function: cwd]");

        engine
            .evaluate(job("bin.js", "#!/usr/bin/env node\nmodule.exports = 42;", &[]))
            .await
            .unwrap();
        assert_eq!(engine.exports("bin.js").await.unwrap(), 42);
    }
}

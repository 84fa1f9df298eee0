use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use kiln_build::{BuildArtifact, BuildFile, RuntimeData, Symbol};
use kiln_protocol::{
  ChannelRun, HostMessage, HostSession, Program, ProtocolConfig, StartRequest, Worker,
  WorkerMessage, duplex, serve,
};
use kiln_runtime::{Callbacks, ExecutorId, Kwargs, Run, RunId, RuntimeError, Value, Values};
use tokio_util::sync::CancellationToken;

/// Worker whose behaviour is driven by the entry path.
struct ScriptWorker {
  run_id: OnceLock<RunId>,
}

impl ScriptWorker {
  fn new() -> Self {
    Self {
      run_id: OnceLock::new(),
    }
  }

  fn own(&self, name: &str) -> Value {
    let run_id = self.run_id.get().cloned().unwrap_or_else(|| RunId::new("?"));
    Value::function(run_id, name)
  }
}

#[async_trait]
impl Worker for ScriptWorker {
  async fn start(
    &self,
    request: StartRequest,
    callbacks: Arc<dyn Callbacks>,
  ) -> Result<BTreeMap<String, Value>, RuntimeError> {
    let _ = self.run_id.set(request.run_id.clone());
    let mut values = BTreeMap::new();

    match request.entry_path.as_str() {
      "chatty" => {
        callbacks.print(&request.run_id, "starting").await;
        let lib = callbacks.load(&request.run_id, "lib").await?;
        let fresh = callbacks.new_run_id().await?;
        let host_fn = Value::function(ExecutorId::Integration("host".to_string()), "add");
        let sum = callbacks
          .call(&request.run_id, &host_fn, vec![Value::Integer(2), Value::Integer(3)], Kwargs::new())
          .await?;
        values.insert("lib".to_string(), lib.get("answer").cloned().unwrap_or(Value::Nothing));
        values.insert("fresh".to_string(), Value::String(fresh.to_string()));
        values.insert("sum".to_string(), sum);
      }
      "compiled" => {
        let data = request
          .program
          .compiled("json")
          .and_then(|compiled| compiled.get("main.json"))
          .cloned()
          .unwrap_or_default();
        values.insert("bytes".to_string(), Value::Bytes(data));
        let archived = matches!(request.program, Program::Archive(_));
        values.insert("archived".to_string(), Value::Boolean(archived));
      }
      "fail" => return Err(RuntimeError::program("boom at startup")),
      "hang" => std::future::pending::<()>().await,
      _ => {}
    }

    values.insert("greet".to_string(), self.own("greet"));
    values.insert("reenter".to_string(), self.own("reenter"));
    values.extend(request.globals);
    Ok(values)
  }

  async fn call(
    &self,
    callee: &Value,
    args: Vec<Value>,
    _kwargs: Kwargs,
    callbacks: Arc<dyn Callbacks>,
  ) -> Result<Value, RuntimeError> {
    let run_id = self.run_id.get().cloned().unwrap_or_else(|| RunId::new("?"));
    let name = callee.as_function().map(|f| f.name.as_str()).unwrap_or_default();
    match name {
      "greet" => {
        let who = args.first().and_then(Value::as_str).unwrap_or("world");
        Ok(Value::String(format!("hello, {who}")))
      }
      "reenter" => callbacks.call(&run_id, &self.own("greet"), vec![], Kwargs::new()).await,
      other => Err(RuntimeError::program(format!("no function '{other}'"))),
    }
  }
}

/// Host callbacks that record traffic. Calls to `run:` values are routed to
/// the registered run, which lets a test re-enter a busy session.
#[derive(Default)]
struct Recorder {
  prints: Mutex<Vec<String>>,
  loads: Mutex<Vec<String>>,
  run: OnceLock<Arc<ChannelRun>>,
}

#[async_trait]
impl Callbacks for Recorder {
  async fn print(&self, _run_id: &RunId, text: &str) {
    self.prints.lock().unwrap().push(text.to_string());
  }

  async fn new_run_id(&self) -> Result<RunId, RuntimeError> {
    Ok(RunId::new("fresh-1"))
  }

  async fn call(
    &self,
    _run_id: &RunId,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  ) -> Result<Value, RuntimeError> {
    let function = callee.as_function().ok_or_else(|| RuntimeError::program("not callable"))?;
    match &function.executor_id {
      ExecutorId::Integration(_) => {
        let sum = args
          .iter()
          .map(|v| match v {
            Value::Integer(i) => *i,
            _ => 0,
          })
          .sum();
        Ok(Value::Integer(sum))
      }
      ExecutorId::Run(run_id) => match self.run.get() {
        Some(run) => run.call(callee, args, kwargs).await,
        None => Err(RuntimeError::RunNotFound {
          run_id: run_id.to_string(),
        }),
      },
    }
  }

  async fn load(&self, _run_id: &RunId, path: &str) -> Result<Values, RuntimeError> {
    self.loads.lock().unwrap().push(path.to_string());
    Ok(Arc::new(BTreeMap::from([(
      "answer".to_string(),
      Value::Integer(42),
    )])))
  }
}

async fn start(
  entry: &str,
  recorder: Arc<Recorder>,
  cancel: CancellationToken,
) -> Result<Arc<ChannelRun>, RuntimeError> {
  let (host, worker) = duplex(&ProtocolConfig::default());
  tokio::spawn(serve(ScriptWorker::new(), worker));
  let session = HostSession::new(RunId::new("r1"), host, recorder, cancel);
  session
    .start_single(
      Symbol::new("script").unwrap(),
      BuildArtifact::default(),
      entry,
      Kwargs::new(),
    )
    .await
}

#[tokio::test]
async fn test_start_and_call() {
  let run = start("plain", Arc::new(Recorder::default()), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(run.id().as_str(), "r1");

  let greet = run.values()["greet"].clone();
  let result = run
    .call(&greet, vec![Value::from("kiln")], Kwargs::new())
    .await
    .unwrap();
  assert_eq!(result, Value::String("hello, kiln".to_string()));

  // Sequential requests on one session are fine.
  let again = run.call(&greet, vec![], Kwargs::new()).await.unwrap();
  assert_eq!(again, Value::String("hello, world".to_string()));
  run.close().await;
}

#[tokio::test]
async fn test_worker_requests_serviced_during_start() {
  let recorder = Arc::new(Recorder::default());
  let run = start("chatty", recorder.clone(), CancellationToken::new())
    .await
    .unwrap();

  let values = run.values();
  assert_eq!(values["lib"], Value::Integer(42));
  assert_eq!(values["fresh"], Value::String("fresh-1".to_string()));
  assert_eq!(values["sum"], Value::Integer(5));
  assert_eq!(*recorder.prints.lock().unwrap(), vec!["starting"]);
  assert_eq!(*recorder.loads.lock().unwrap(), vec!["lib"]);
}

#[tokio::test]
async fn test_program_error_at_start() {
  let err = start("fail", Arc::new(Recorder::default()), CancellationToken::new())
    .await
    .err()
    .unwrap();
  assert!(err.is_program_error());
}

#[tokio::test]
async fn test_program_error_from_call() {
  let run = start("plain", Arc::new(Recorder::default()), CancellationToken::new())
    .await
    .unwrap();
  let missing = Value::function(run.id().clone(), "missing");
  let err = run.call(&missing, vec![], Kwargs::new()).await.unwrap_err();
  assert_eq!(err, RuntimeError::program("no function 'missing'"));
}

#[tokio::test]
async fn test_reentrant_call_fails_fast() {
  let recorder = Arc::new(Recorder::default());
  let run = start("plain", recorder.clone(), CancellationToken::new())
    .await
    .unwrap();
  let _ = recorder.run.set(run.clone());

  let reenter = run.values()["reenter"].clone();
  let err = run.call(&reenter, vec![], Kwargs::new()).await.unwrap_err();
  assert!(matches!(err, RuntimeError::Protocol { ref message } if message.contains("in flight")));

  // The session is usable again afterwards.
  let greet = run.values()["greet"].clone();
  assert!(run.call(&greet, vec![], Kwargs::new()).await.is_ok());
}

#[tokio::test]
async fn test_abandoned_call_does_not_shift_responses() {
  let run = start("plain", Arc::new(Recorder::default()), CancellationToken::new())
    .await
    .unwrap();
  let greet = run.values()["greet"].clone();

  // Poll the first call once so its request goes out, then drop it.
  tokio::select! {
    biased;
    _ = run.call(&greet, vec![Value::from("first")], Kwargs::new()) => {
      panic!("worker answered before it was scheduled");
    }
    _ = std::future::ready(()) => {}
  }

  let result = run
    .call(&greet, vec![Value::from("second")], Kwargs::new())
    .await
    .unwrap();
  assert_eq!(result, Value::String("hello, second".to_string()));

  let result = run
    .call(&greet, vec![Value::from("third")], Kwargs::new())
    .await
    .unwrap();
  assert_eq!(result, Value::String("hello, third".to_string()));
}

#[tokio::test]
async fn test_cancel_while_waiting() {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::task::yield_now().await;
    trigger.cancel();
  });

  let err = start("hang", Arc::new(Recorder::default()), cancel)
    .await
    .err()
    .unwrap();
  assert_eq!(err, RuntimeError::Cancelled);
}

#[tokio::test]
async fn test_call_after_close() {
  let run = start("plain", Arc::new(Recorder::default()), CancellationToken::new())
    .await
    .unwrap();
  run.close().await;
  run.close().await;

  let greet = run.values()["greet"].clone();
  let err = run.call(&greet, vec![], Kwargs::new()).await.unwrap_err();
  assert!(err.is_not_found());
}

#[tokio::test]
async fn test_worker_hangs_up() {
  let (host, worker) = duplex(&ProtocolConfig::default());
  drop(worker);
  let session = HostSession::new(
    RunId::new("r1"),
    host,
    Arc::new(Recorder::default()),
    CancellationToken::new(),
  );
  let err = session
    .start_single(Symbol::new("script").unwrap(), BuildArtifact::default(), "x", Kwargs::new())
    .await
    .err()
    .unwrap();
  assert!(matches!(err, RuntimeError::Protocol { .. }));
}

#[tokio::test]
async fn test_start_from_archive() {
  let mut data = RuntimeData::new(Symbol::new("json").unwrap());
  data
    .artifact
    .compiled_data
    .insert("main.json".to_string(), b"{}".to_vec());
  let build = BuildFile {
    runtimes: vec![data],
    ..BuildFile::default()
  };

  let (host, worker) = duplex(&ProtocolConfig::default());
  tokio::spawn(serve(ScriptWorker::new(), worker));
  let session = HostSession::new(
    RunId::new("r1"),
    host,
    Arc::new(Recorder::default()),
    CancellationToken::new(),
  );
  let globals = Kwargs::from([("region".to_string(), Value::from("eu"))]);
  let run = session.start_archive(&build, "compiled", globals).await.unwrap();

  let values = run.values();
  assert_eq!(values["bytes"], Value::Bytes(b"{}".to_vec()));
  assert_eq!(values["archived"], Value::Boolean(true));
  assert_eq!(values["region"], Value::from("eu"));
}

#[tokio::test]
async fn test_corrupt_archive_rejected_by_worker() {
  let (mut host, worker) = duplex(&ProtocolConfig::default());
  let served = tokio::spawn(serve(ScriptWorker::new(), worker));

  host
    .tx
    .send(HostMessage::Start {
      archive: b"not an archive".to_vec(),
      run_id: RunId::new("r1"),
      entry_path: "x".to_string(),
      globals: Kwargs::new(),
    })
    .await
    .unwrap();

  let reply = host.rx.recv().await.unwrap();
  assert!(matches!(
    reply,
    WorkerMessage::StartReturn {
      result: Err(RuntimeError::Protocol { .. })
    }
  ));
  assert!(served.await.unwrap().is_err());
}

#[tokio::test]
async fn test_worker_rejects_out_of_order_start() {
  let (host, worker) = duplex(&ProtocolConfig::default());
  let served = tokio::spawn(serve(ScriptWorker::new(), worker));
  host
    .tx
    .send(HostMessage::CallReturn {
      result: Ok(Value::Nothing),
    })
    .await
    .unwrap();
  let err = served.await.unwrap().unwrap_err();
  assert!(matches!(err, RuntimeError::Protocol { .. }));
}

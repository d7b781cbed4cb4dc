use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use dagkernel::errors::{KernelError, TaskError};
use dagkernel::future::{AppFuture, AppValue};
use dagkernel_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn callbacks_run_once_in_registration_order() -> TestResult {
    init_tracing();

    let future = AppFuture::new(0, vec![]);
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let seen = seen.clone();
        future.on_settled(move |outcome| {
            assert!(outcome.is_ok());
            seen.lock().unwrap().push(i);
        });
    }

    future.resolve(AppValue::new(json!(1)))?;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

    // A second settle is rejected and does not re-run callbacks.
    let err = future.resolve(AppValue::new(json!(2))).unwrap_err();
    assert!(matches!(err, KernelError::AlreadySettled(0)));
    assert_eq!(seen.lock().unwrap().len(), 3);
    assert_eq!(future.wait()?, json!(1));
    Ok(())
}

#[test]
fn callback_registered_while_settling_waits_for_earlier_ones() -> TestResult {
    let future = AppFuture::new(5, vec![]);
    let order = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    {
        let order = order.clone();
        future.on_settled(move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            order.lock().unwrap().push("first");
        });
    }

    let settler = {
        let future = future.clone();
        std::thread::spawn(move || future.resolve(AppValue::new(json!(5))))
    };
    started_rx.recv_timeout(Duration::from_secs(5))?;
    assert!(future.is_done());

    {
        let order = order.clone();
        future.on_settled(move |_| order.lock().unwrap().push("second"));
    }
    assert!(order.lock().unwrap().is_empty());

    release_tx.send(())?;
    settler.join().expect("settling thread panicked")?;
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

    // Once the drain is over, new callbacks run right away again.
    let late = Arc::new(Mutex::new(false));
    let flag = late.clone();
    future.on_settled(move |_| *flag.lock().unwrap() = true);
    assert!(*late.lock().unwrap());
    Ok(())
}

#[test]
fn callback_registered_after_settle_runs_immediately() -> TestResult {
    let future = AppFuture::new(7, vec![]);
    future.fail(TaskError::Cancelled { task: 7 })?;

    let fired = Arc::new(Mutex::new(None));
    let slot = fired.clone();
    future.on_settled(move |outcome| {
        *slot.lock().unwrap() = Some(outcome.clone());
    });

    let outcome = fired.lock().unwrap().clone().expect("callback ran");
    assert_eq!(outcome, Err(TaskError::Cancelled { task: 7 }));
    Ok(())
}

#[test]
fn fail_after_resolve_is_rejected() -> TestResult {
    let future = AppFuture::new(3, vec![]);
    future.resolve(AppValue::new(json!("ok")))?;
    assert!(future.fail(TaskError::Cancelled { task: 3 }).is_err());
    assert_eq!(future.try_outcome(), Some(Ok(AppValue::new(json!("ok")))));
    Ok(())
}

#[test]
fn wait_timeout_returns_none_while_pending() {
    let future = AppFuture::new(1, vec![]);
    assert!(!future.is_done());
    assert!(future.wait_timeout(Duration::from_millis(20)).is_none());
}

#[test]
fn blocking_wait_sees_value_from_other_thread() -> TestResult {
    let future = AppFuture::new(2, vec![]);
    let settler = future.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        settler.resolve(AppValue::new(json!(42))).unwrap();
    });

    assert_eq!(future.wait()?, json!(42));
    handle.join().unwrap();
    Ok(())
}

#[tokio::test]
async fn async_result_wakes_on_settle() -> TestResult {
    let future = AppFuture::new(4, vec![]);
    let settler = future.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        settler.fail(TaskError::execution(4, "boom")).unwrap();
    });

    let err = with_timeout(future.result()).await.unwrap_err();
    assert_eq!(err.kind(), "execution_failed");
    Ok(())
}

#[tokio::test]
async fn deferred_callback_runs_off_the_settling_thread() -> TestResult {
    let future = AppFuture::new(5, vec![]);
    let (tx, rx) = tokio::sync::oneshot::channel();
    let settling_thread = std::thread::current().id();

    future.on_settled_deferred(move |outcome| {
        let _ = tx.send((std::thread::current().id(), outcome));
    });
    future.resolve(AppValue::new(json!(null)))?;

    let (thread, outcome) = with_timeout(rx).await?;
    assert_ne!(thread, settling_thread);
    assert!(outcome.is_ok());
    Ok(())
}

#[test]
fn data_futures_follow_their_parent() -> TestResult {
    let future = AppFuture::new(9, vec!["a.txt".into(), "b.txt".into()]);
    let outputs = future.outputs();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].filename(), "b.txt");
    assert!(outputs[0].try_path().is_none());

    future.resolve(AppValue::with_outputs(
        json!(null),
        vec!["/run/a.txt".into(), "/run/b.txt".into()],
    ))?;
    assert_eq!(outputs[0].wait()?, std::path::PathBuf::from("/run/a.txt"));
    assert_eq!(outputs[1].wait()?, std::path::PathBuf::from("/run/b.txt"));
    Ok(())
}

#[test]
fn data_future_of_failed_parent_carries_the_error() {
    let future = AppFuture::new(10, vec!["out.dat".into()]);
    let data = future.outputs().remove(0);
    future.fail(TaskError::execution(10, "exit 1")).unwrap();

    let err = data.wait().unwrap_err();
    assert_eq!(err.kind(), "execution_failed");
}

#[test]
fn missing_staged_path_is_an_output_staging_failure() {
    let future = AppFuture::new(11, vec!["out.dat".into()]);
    future.resolve(AppValue::new(json!(0))).unwrap();

    let err = future.outputs()[0].wait().unwrap_err();
    assert!(matches!(err, TaskError::OutputStagingFailed { task: 11, .. }));
}

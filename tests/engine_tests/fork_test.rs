use proptest::prelude::*;
use sandstep::{
    ErrorCode, Expression as E, Interpreter, ProcedureDef, Program, RuntimeResult, Step, Value,
};

#[tokio::test]
async fn test_forks_read_globals_but_cannot_write_them() -> RuntimeResult<()> {
    let root = Interpreter::builder().build().unwrap();
    root.set_global_variable("x", Value::from(10i64)).await?;

    let fork = root.fork("worker", None).await?;
    assert_eq!(fork.get_variable("x").await?, Value::from(10i64));

    let err = fork.set_variable("x", Value::from(20i64)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::WriteViolation);
    assert_eq!(root.get_variable("x").await?, Value::from(10i64));

    // root が書き換えても既存の fork は作成時点の値を見る
    root.set_global_variable("x", Value::from(30i64)).await?;
    assert_eq!(fork.get_variable("x").await?, Value::from(10i64));
    let later = root.fork("later", None).await?;
    assert_eq!(later.get_variable("x").await?, Value::from(30i64));
    Ok(())
}

#[tokio::test]
async fn test_procedure_writing_global_fails_with_status() -> RuntimeResult<()> {
    let root = Interpreter::builder().build().unwrap();
    root.set_global_variable("x", Value::from(10i64)).await?;
    root.load(Program {
        procedures: vec![ProcedureDef {
            name: "bump".to_string(),
            body: vec![Step::set("x", E::number(20.0))],
            ..Default::default()
        }],
        ..Default::default()
    })
    .await?;

    let outcome = root.execute(vec![Step::call("bump", vec![])]).await;
    assert_eq!(outcome.status, ErrorCode::WriteViolation.status());
    assert_eq!(root.get_variable("x").await?, Value::from(10i64));
    Ok(())
}

#[tokio::test]
async fn test_root_locals_are_not_visible_to_forks() -> RuntimeResult<()> {
    let root = Interpreter::builder().build().unwrap();
    root.set_variable("scratch", Value::from("root only")).await?;
    let fork = root.fork("worker", None).await?;
    let err = fork.get_variable("scratch").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    Ok(())
}

#[tokio::test]
async fn test_live_fork_registry() -> RuntimeResult<()> {
    let root = Interpreter::builder().build().unwrap();
    assert!(root.live_forks().is_empty());

    let child = root.fork("child", None).await?;
    let grandchild = child.fork("grandchild", None).await?;
    let forks = root.live_forks();
    assert_eq!(forks.len(), 2);
    assert_eq!(forks[0].frame, "child");
    assert_eq!(forks[1].parent, child.id());
    assert_eq!(grandchild.call_stack(), ["child", "grandchild"]);

    drop(grandchild);
    drop(child);
    assert!(root.live_forks().is_empty());
    Ok(())
}

proptest! {
    #[test]
    fn prop_sibling_forks_do_not_share_locals(
        name in "[a-z][a-z0-9_]{0,8}",
        left in any::<i32>(),
        right in any::<i32>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let root = Interpreter::builder().build().unwrap();
            let a = root.fork("a", None).await.unwrap();
            let b = root.fork("b", None).await.unwrap();

            a.set_variable(&name, Value::from(left as i64)).await.unwrap();
            b.set_variable(&name, Value::from(right as i64)).await.unwrap();

            prop_assert_eq!(a.get_variable(&name).await.unwrap(), Value::from(left as i64));
            prop_assert_eq!(b.get_variable(&name).await.unwrap(), Value::from(right as i64));
            prop_assert!(root.get_variable(&name).await.is_err());
            Ok(())
        })?;
    }
}

use std::sync::Arc;

use sandstep::store::{
    Account, AccountAdmin, AgentModel, AgentModelAdmin, AgentModelStore, InMemoryAccountStore,
    InMemoryAgentModelStore, StoreError,
};
use sandstep::policy::MockPolicyGate;
use sandstep::{Capability, ErrorCode, GrantSet, Interpreter, PolicyError, Value};

#[tokio::test]
async fn test_denied_admin_leaves_store_untouched() {
    let mut policy = MockPolicyGate::new();
    policy
        .expect_check()
        .withf(|cap| *cap == Capability::model_admin())
        .times(1)
        .returning(|cap| Err(PolicyError::Denied(cap.to_string())));

    let store = Arc::new(InMemoryAgentModelStore::new());
    let admin = AgentModelAdmin::new(store.clone(), Arc::new(policy));
    let err = admin
        .register(AgentModel::new("helper", "expert", "m"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Policy(PolicyError::Denied(_))));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_granted_admin_lifecycle() {
    let policy = GrantSet::new().grant(Capability::model_admin());
    let admin = AgentModelAdmin::new(Arc::new(InMemoryAgentModelStore::new()), Arc::new(policy));

    admin
        .register(AgentModel::new("helper", "expert", "m1"))
        .await
        .unwrap();
    admin
        .update(AgentModel::new("helper", "expert", "m2").looping(3))
        .await
        .unwrap();
    let model = admin.reader().get("helper").await.unwrap();
    assert_eq!(model.model, "m2");
    assert!(model.allow_loop);
    assert_eq!(model.max_turns, 3);

    admin.delete("helper").await.unwrap();
    assert!(matches!(
        admin.reader().get("helper").await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_account_admin_needs_its_own_capability() {
    let policy = Arc::new(GrantSet::new().grant(Capability::model_admin()));
    let admin = AccountAdmin::new(Arc::new(InMemoryAccountStore::new()), policy);
    let err = admin
        .register(Account::new("team", "expert", "sk"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Policy(_)));
}

#[tokio::test]
async fn test_listing_tool_is_policy_checked() {
    let store: Arc<dyn AgentModelStore> = Arc::new(InMemoryAgentModelStore::new());
    store
        .register(AgentModel::new("helper", "expert", "m"))
        .await
        .unwrap();

    let denied = Interpreter::builder()
        .agent_models(store.clone())
        .policy(Arc::new(GrantSet::new()))
        .build()
        .unwrap();
    let err = denied.call("agentmodel.list", vec![]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Policy);

    let allowed = Interpreter::builder()
        .agent_models(store)
        .policy(Arc::new(GrantSet::new().grant(Capability::model_read())))
        .build()
        .unwrap();
    match allowed.call("agentmodel.list", vec![]).await.unwrap() {
        Value::List(models) => assert_eq!(models.len(), 1),
        other => panic!("unexpected value {:?}", other),
    }
}

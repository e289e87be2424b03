//! Test setup macros for reducing boilerplate across the test suite.

/// Creates a test context and an opened replica around a machine.
///
/// # Syntax
///
/// ```text
/// test_replica!(ctx, replica, regular: machine_expr)
/// test_replica!(ctx, replica, concurrent: machine_expr)
/// test_replica!(ctx, replica, on_disk)          // DiskKv in the context dir
/// ```
///
/// # Examples
///
/// ```
/// use statemachine::HelloWorld;
/// use testsupport::test_replica;
///
/// test_replica!(ctx, replica, regular: HelloWorld::new());
/// assert_eq!(replica.applied_index(), 0);
/// assert!(ctx.data_dir().exists());
/// ```
///
/// ```
/// use testsupport::test_replica;
///
/// test_replica!(ctx, replica, on_disk);
/// assert_eq!(replica.kind(), common::StateMachineKind::OnDisk);
/// ```
#[macro_export]
macro_rules! test_replica {
    ($ctx:ident, $replica:ident, on_disk) => {
        let $ctx = $crate::context::TestContext::new().unwrap();
        let $replica = $ctx.on_disk($ctx.disk_kv()).unwrap();
        $replica.open().unwrap();
    };

    ($ctx:ident, $replica:ident, $variant:ident: $machine:expr) => {
        let $ctx = $crate::context::TestContext::new().unwrap();
        let $replica = $ctx.$variant($machine).unwrap();
        $replica.open().unwrap();
    };
}

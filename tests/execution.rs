use std::sync::Arc;

use futures_util::future::join_all;
use sqlhelper::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder, TestResponse};
use sqlhelper::{
    CancellationToken, CommandKind, DatabaseDriver, FromRow, OutputSpec, Params, Row, SqlHelper,
    SqlHelperError, SqlType, SqlValue,
};

#[derive(Debug, PartialEq)]
struct User {
    id: i32,
    name: String,
}

impl FromRow for User {
    fn from_row(row: &Row) -> sqlhelper::Result<Self> {
        Ok(User {
            id: row.get("Id")?,
            name: row.get("Name")?,
        })
    }
}

fn users_response(count: i32) -> TestResponse {
    let mut builder = InMemoryTestResponseBuilder::new().columns(&["Id", "Name"]);
    for id in 1..=count {
        builder = builder.row(vec![SqlValue::Int32(id), format!("user{}", id).into()]);
    }
    builder.build()
}

fn helper_for(driver: &Arc<InMemoryTestDriver>) -> SqlHelper {
    let driver: Arc<dyn DatabaseDriver> = Arc::clone(driver) as Arc<dyn DatabaseDriver>;
    SqlHelper::with_driver(driver)
        .configure("Server=test;Database=app")
        .unwrap()
}

#[tokio::test]
async fn test_execute_query_returns_rows_affected() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new().rows_affected(3).build(),
    ));
    let helper = helper_for(&in_memory_test_driver);

    let affected = helper
        .execute_query(
            "UPDATE Users SET Active = @Active WHERE Age > @Age",
            Some(&Params::new().with("@Active", false).with("@Age", 65)),
        )
        .await
        .unwrap();

    assert_eq!(affected, 3);
    in_memory_test_driver.assert_last_command(
        "UPDATE Users SET Active = @Active WHERE Age > @Age",
        &[
            ("@Active", SqlValue::Bool(false)),
            ("@Age", SqlValue::Int32(65)),
        ],
    );
    in_memory_test_driver.assert_last_kind(CommandKind::Text);
    assert_eq!(
        in_memory_test_driver.connection_strings(),
        ["Server=test;Database=app"]
    );
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_execute_stored_procedure_returns_success() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let helper = helper_for(&in_memory_test_driver);

    let ok = helper
        .execute_stored_procedure(
            "dbo.DeactivateUser",
            Some(&Params::new().with("@Id", 9).with("@Reason", None::<String>)),
        )
        .await
        .unwrap();

    assert!(ok);
    in_memory_test_driver.assert_last_command(
        "dbo.DeactivateUser",
        &[("@Id", SqlValue::Int32(9)), ("@Reason", SqlValue::Null)],
    );
    in_memory_test_driver.assert_last_kind(CommandKind::StoredProcedure);
}

#[tokio::test]
async fn test_list_preserves_cursor_order() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["Id", "Name"])
                .row(vec![SqlValue::Int32(3), "c".into()])
                .row(vec![SqlValue::Int32(1), "a".into()])
                .row(vec![SqlValue::Int32(2), "b".into()])
                .build(),
        ),
    );
    let helper = helper_for(&in_memory_test_driver);

    let users = helper
        .execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
        .await
        .unwrap();

    let ids: Vec<i32> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, [3, 1, 2]);
    in_memory_test_driver.assert_last_command("SELECT Id, Name FROM Users", &[]);
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_stored_procedure_list_with_closure_mapper() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(2)));
    let helper = helper_for(&in_memory_test_driver);

    let names = helper
        .execute_stored_procedure_list(
            "dbo.GetUsers",
            Some(&Params::new().with("@Active", true)),
            |row: &Row| row.get::<String, _>("Name"),
        )
        .await
        .unwrap();

    assert_eq!(names, ["user1", "user2"]);
    in_memory_test_driver.assert_last_kind(CommandKind::StoredProcedure);
}

#[tokio::test]
async fn test_list_of_empty_result() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let helper = helper_for(&in_memory_test_driver);

    let users = helper
        .execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
        .await
        .unwrap();

    assert!(users.is_empty());
}

#[tokio::test]
async fn test_single_returns_first_row_only() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(5)));
    let helper = helper_for(&in_memory_test_driver);

    let user = helper
        .execute_query_single(
            "SELECT Id, Name FROM Users WHERE Name LIKE @Pattern",
            Some(&Params::new().with("@Pattern", "user%")),
            User::from_row,
        )
        .await
        .unwrap();

    assert_eq!(
        user,
        Some(User {
            id: 1,
            name: "user1".to_string()
        })
    );
    assert_eq!(in_memory_test_driver.rows_fetched(), 1);
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_single_with_no_rows_is_none() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(0)));
    let helper = helper_for(&in_memory_test_driver);

    let user = helper
        .execute_stored_procedure_single(
            "dbo.GetUserById",
            Some(&Params::new().with("@Id", 404)),
            User::from_row,
        )
        .await
        .unwrap();

    assert_eq!(user, None);
}

#[tokio::test]
async fn test_mapping_failure_reports_row_and_command() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(5)));
    let helper = helper_for(&in_memory_test_driver);

    let err = helper
        .execute_query_list("SELECT Id, Name FROM Users", None, |row: &Row| {
            let id: i32 = row.get("Id")?;
            if id == 3 {
                return Err(SqlHelperError::Decode("bad shape".to_string()));
            }
            Ok(id)
        })
        .await
        .unwrap_err();

    assert!(err.is_mapping_error());
    match &err {
        SqlHelperError::Mapping {
            command,
            row,
            source,
        } => {
            assert_eq!(command, "SELECT Id, Name FROM Users");
            assert_eq!(*row, 2);
            assert!(matches!(**source, SqlHelperError::Decode(_)));
        }
        other => panic!("Expected Mapping error, got {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "Failed mapping row 2 of SELECT Id, Name FROM Users: Decode error: bad shape"
    );
    // the remaining rows are never fetched
    assert_eq!(in_memory_test_driver.rows_fetched(), 3);
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_missing_column_is_a_mapping_error() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(1)));
    let helper = helper_for(&in_memory_test_driver);

    let err = helper
        .execute_query_list("SELECT Id, Name FROM Users", None, |row: &Row| {
            row.get::<String, _>("Email")
        })
        .await
        .unwrap_err();

    assert!(err.is_mapping_error());
    assert_eq!(err.command(), Some("SELECT Id, Name FROM Users"));
}

#[tokio::test]
async fn test_execution_failure_is_wrapped_with_command() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(TestResponse::failure("Invalid object name 'Userz'")),
    );
    let helper = helper_for(&in_memory_test_driver);

    let err = helper
        .execute_query_list("SELECT * FROM Userz", None, User::from_row)
        .await
        .unwrap_err();

    assert!(!err.is_mapping_error());
    match &err {
        SqlHelperError::Execution { command, source } => {
            assert_eq!(command, "SELECT * FROM Userz");
            assert!(matches!(**source, SqlHelperError::QueryFailed(_)));
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_connection_failure_is_wrapped_with_command() {
    let in_memory_test_driver =
        Arc::new(InMemoryTestDriver::new().with_open_failure("server unreachable"));
    let helper = helper_for(&in_memory_test_driver);

    let err = helper
        .execute_stored_procedure("dbo.Ping", None)
        .await
        .unwrap_err();

    match &err {
        SqlHelperError::Execution { command, source } => {
            assert_eq!(command, "dbo.Ping");
            assert!(matches!(**source, SqlHelperError::ConnectionFailed(_)));
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
    in_memory_test_driver.assert_command_count(0);
}

#[tokio::test]
async fn test_unconfigured_helper_never_touches_driver() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let driver: Arc<dyn DatabaseDriver> =
        Arc::clone(&in_memory_test_driver) as Arc<dyn DatabaseDriver>;
    let helper = SqlHelper::with_driver(driver);

    let results = [
        helper.execute_query("DELETE FROM Users", None).await.map(|_| ()),
        helper
            .execute_stored_procedure("dbo.Ping", None)
            .await
            .map(|_| ()),
        helper
            .execute_query_list("SELECT 1", None, |row: &Row| row.get::<i32, _>(0))
            .await
            .map(|_| ()),
        helper
            .execute_stored_procedure_single("dbo.One", None, |row: &Row| row.get::<i32, _>(0))
            .await
            .map(|_| ()),
        helper
            .execute_query_multiple_tables("SELECT 1; SELECT 2", None)
            .await
            .map(|_| ()),
        helper
            .execute_stored_procedure_output_only("dbo.Count", None, &OutputSpec::new())
            .await
            .map(|_| ()),
        helper
            .execute_stored_procedure_paginated("dbo.Paged", 1, 10, None, User::from_row)
            .await
            .map(|_| ()),
        helper
            .execute_query_paginated("SELECT 1", "SELECT 1", 1, 10, None, User::from_row)
            .await
            .map(|_| ()),
    ];

    for result in results {
        match result {
            Err(err) => assert!(err.is_configuration_error(), "got {:?}", err),
            Ok(()) => panic!("Expected NotConfigured"),
        }
    }
    assert_eq!(in_memory_test_driver.opened_connections(), 0);
    in_memory_test_driver.assert_command_count(0);
}

#[tokio::test]
async fn test_configure_twice_behaves_like_once() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_default_response(users_response(2)),
    );
    let once = helper_for(&in_memory_test_driver);
    let twice = once.clone().configure("Server=test;Database=app").unwrap();

    let a = once
        .execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
        .await
        .unwrap();
    let b = twice
        .execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(
        in_memory_test_driver.connection_strings(),
        ["Server=test;Database=app", "Server=test;Database=app"]
    );
}

#[tokio::test]
async fn test_multiple_tables_returns_raw_result_sets() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["Id", "Name"])
                .row(vec![SqlValue::Int32(1), "Alice".into()])
                .row(vec![SqlValue::Int32(2), "Bob".into()])
                .next_result_set()
                .columns(&["OrderId", "Total"])
                .row(vec![SqlValue::Int64(10), SqlValue::Float64(9.5)])
                .build(),
        ),
    );
    let helper = helper_for(&in_memory_test_driver);

    let data_set = helper
        .execute_stored_procedure_multiple_tables(
            "dbo.GetUserWithOrders",
            Some(&Params::new().with("@UserId", 1)),
        )
        .await
        .unwrap();

    assert_eq!(data_set.len(), 2);
    let users = data_set.table(0).unwrap();
    assert_eq!(users.columns(), ["Id", "Name"]);
    assert_eq!(users.len(), 2);
    assert_eq!(users.rows()[1].get::<String, _>("Name").unwrap(), "Bob");

    let orders = data_set.table(1).unwrap();
    assert_eq!(orders.rows()[0].get::<i64, _>("OrderId").unwrap(), 10);
    assert_eq!(orders.rows()[0].get::<f64, _>("Total").unwrap(), 9.5);
    in_memory_test_driver.assert_all_released();
}

#[tokio::test]
async fn test_query_multiple_tables() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(
        InMemoryTestResponseBuilder::new()
            .columns(&["A"])
            .row(vec![SqlValue::Int32(1)])
            .next_result_set()
            .columns(&["B"])
            .build(),
    ));
    let helper = helper_for(&in_memory_test_driver);

    let data_set = helper
        .execute_query_multiple_tables("SELECT 1 AS A; SELECT B FROM Empty", None)
        .await
        .unwrap();

    assert_eq!(data_set.len(), 2);
    assert!(data_set.table(1).unwrap().is_empty());
    in_memory_test_driver.assert_last_kind(CommandKind::Text);
}

#[tokio::test]
async fn test_with_output_maps_rows_and_reads_outputs() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["Id", "Name"])
                .row(vec![SqlValue::Int32(1), "Alice".into()])
                .output("@Count", SqlValue::Int32(1))
                .output("@Undeclared", SqlValue::Int32(99))
                .build(),
        ),
    );
    let helper = helper_for(&in_memory_test_driver);
    let outputs = OutputSpec::new()
        .with("@Count", SqlType::Int32)
        .with("@Message", SqlType::Text);

    let result = helper
        .execute_stored_procedure_with_output(
            "dbo.SearchUsers",
            Some(&Params::new().with("@Term", "Al")),
            &outputs,
            User::from_row,
        )
        .await
        .unwrap();

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.output_values.get::<i32>("@Count").unwrap(), 1);
    assert_eq!(
        result.output_values.value("@Message"),
        Some(&SqlValue::Null)
    );
    assert_eq!(result.output_values.value("@Undeclared"), None);
    assert_eq!(result.output_values.len(), 2);

    let command = in_memory_test_driver.last_command().unwrap();
    let declared: Vec<_> = command
        .outputs()
        .map(|p| (p.name.as_str(), p.sql_type))
        .collect();
    assert_eq!(
        declared,
        [
            ("@Count", Some(SqlType::Int32)),
            ("@Message", Some(SqlType::Text))
        ]
    );
    in_memory_test_driver.assert_last_command("dbo.SearchUsers", &[("@Term", "Al".into())]);
}

#[tokio::test]
async fn test_output_only_skips_rows() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["Id"])
                .row(vec![SqlValue::Int32(1)])
                .output("@NewId", SqlValue::Int64(42))
                .build(),
        ),
    );
    let helper = helper_for(&in_memory_test_driver);

    let result = helper
        .execute_stored_procedure_output_only(
            "dbo.CreateUser",
            Some(&Params::new().with("@Name", "Carol")),
            &OutputSpec::new().with("@NewId", SqlType::Int64),
        )
        .await
        .unwrap();

    assert!(result.data.is_empty());
    assert_eq!(result.output_values.get::<i64>("@NewId").unwrap(), 42);
    assert_eq!(in_memory_test_driver.rows_fetched(), 0);
}

#[tokio::test]
async fn test_with_output_mapping_failure_is_not_rewrapped() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(3)));
    let helper = helper_for(&in_memory_test_driver);

    let err = helper
        .execute_stored_procedure_with_output(
            "dbo.GetUsers",
            None,
            &OutputSpec::new().with("@Total", SqlType::Int32),
            |row: &Row| row.get::<bool, _>("Name"),
        )
        .await
        .unwrap_err();

    match err {
        SqlHelperError::Mapping { command, row, .. } => {
            assert_eq!(command, "dbo.GetUsers");
            assert_eq!(row, 0);
        }
        other => panic!("Expected Mapping error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_before_start_never_opens() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_response(users_response(2)));
    let token = CancellationToken::new();
    let helper = helper_for(&in_memory_test_driver).with_cancellation(token.clone());
    token.cancel();

    let err = helper
        .execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
        .await
        .unwrap_err();

    match err {
        SqlHelperError::Cancelled { command } => assert_eq!(command, "SELECT Id, Name FROM Users"),
        other => panic!("Expected Cancelled, got {:?}", other),
    }
    assert_eq!(in_memory_test_driver.opened_connections(), 0);
    in_memory_test_driver.assert_command_count(0);
}

#[tokio::test]
async fn test_cancel_during_fetch_releases_connection() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["Id", "Name"])
                .row(vec![SqlValue::Int32(1), "Alice".into()])
                .row(vec![SqlValue::Int32(2), "Bob".into()])
                .stall()
                .build(),
        ),
    );
    let token = CancellationToken::new();
    let helper = helper_for(&in_memory_test_driver).with_cancellation(token.clone());

    let call = helper.execute_query_list("SELECT Id, Name FROM Users", None, User::from_row);
    let canceller = async {
        // wait until the cursor has handed out both rows and is stuck on the third
        while in_memory_test_driver.rows_fetched() < 2 {
            tokio::task::yield_now().await;
        }
        token.cancel();
    };
    let (result, ()) = tokio::join!(call, canceller);

    match result.unwrap_err() {
        SqlHelperError::Cancelled { command } => assert_eq!(command, "SELECT Id, Name FROM Users"),
        other => panic!("Expected Cancelled, got {:?}", other),
    }
    assert_eq!(in_memory_test_driver.opened_connections(), 1);
    assert_eq!(in_memory_test_driver.released_connections(), 1);
}

#[tokio::test]
async fn test_concurrent_calls_use_separate_connections() {
    let in_memory_test_driver =
        Arc::new(InMemoryTestDriver::new().with_default_response(users_response(1)));
    let helper = helper_for(&in_memory_test_driver);

    let calls = (0..8).map(|_| {
        helper.execute_query_list("SELECT Id, Name FROM Users", None, User::from_row)
    });
    for result in join_all(calls).await {
        assert_eq!(result.unwrap().len(), 1);
    }

    assert_eq!(in_memory_test_driver.opened_connections(), 8);
    in_memory_test_driver.assert_all_released();
}

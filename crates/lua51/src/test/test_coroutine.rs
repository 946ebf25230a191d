use crate::execute_capturing;

#[test]
fn coroutine_status_transitions() {
    let (out, result) = execute_capturing(
        r#"
        local co = coroutine.create(function() coroutine.yield() end)
        print(coroutine.status(co))
        coroutine.resume(co)
        print(coroutine.status(co))
        coroutine.resume(co)
        print(coroutine.status(co))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "suspended\nsuspended\ndead\n");
}

#[test]
fn resuming_a_dead_coroutine_reports_failure_not_error() {
    let (out, result) = execute_capturing(
        r#"
        local co = coroutine.create(function() return 1 end)
        coroutine.resume(co)
        local ok, msg = coroutine.resume(co)
        print(ok, msg:match("cannot resume dead coroutine") ~= nil)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "false\ttrue\n");
}

#[test]
fn coroutine_wrap_propagates_errors_as_lua_errors() {
    let (_out, result) = execute_capturing(
        r#"
        local f = coroutine.wrap(function() error("inside coroutine") end)
        f()
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn values_pass_through_resume_and_yield() {
    let (out, result) = execute_capturing(
        r#"
        local co = coroutine.create(function(a, b)
          local c = coroutine.yield(a + b)
          return c * 2
        end)
        local _, first = coroutine.resume(co, 1, 2)
        local _, second = coroutine.resume(co, 10)
        print(first, second)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "3\t20\n");
}

#[test]
fn isyieldable_differs_inside_and_outside_coroutine() {
    let (out, result) = execute_capturing(
        r#"
        print(coroutine.isyieldable())
        local co = coroutine.wrap(function() print(coroutine.isyieldable()) end)
        co()
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "false\ntrue\n");
}

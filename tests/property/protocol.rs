//! Property-based tests for the shared protocol crate.
//!
//! Uses proptest to verify:
//! 1. `validate_title` accepts exactly the titles of 3..=250 characters.
//! 2. `validate_description` accepts exactly descriptions of at most 1000 characters.
//! 3. Random bytes never cause a panic in `rpc::decode`.
//! 4. Request frames survive encode → decode.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use tasksync_proto::rpc::{self, RpcFrame, StoreCall};
use tasksync_proto::task::{TaskId, TaskPriority, TaskStatus};
use tasksync_proto::validation::{ValidationError, validate_description, validate_title};
use tasksync_proto::{CreateTaskRequest, UpdateTaskRequest};

/// Strategy for generating task priorities.
fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::None),
        Just(TaskPriority::Low),
        Just(TaskPriority::Medium),
        Just(TaskPriority::High),
    ]
}

/// Strategy for generating partial updates with a random subset of fields.
fn arb_update() -> impl Strategy<Value = UpdateTaskRequest> {
    (
        "[a-z0-9-]{1,36}",
        proptest::option::of("[^\x00]{0,64}"),
        proptest::option::of(prop_oneof![Just(TaskStatus::Todo), Just(TaskStatus::Done)]),
        proptest::option::of(arb_priority()),
        proptest::option::of(proptest::option::of(any::<u64>())),
        proptest::option::of(prop::collection::vec("[a-z]{3,10}", 0..5)),
    )
        .prop_map(
            |(id, title, status, priority, due_date, tags)| UpdateTaskRequest {
                id: TaskId::new(id),
                title,
                status,
                priority,
                due_date,
                description: None,
                tags,
            },
        )
}

proptest! {
    #[test]
    fn title_accepted_iff_within_bounds(len in 0usize..300) {
        let title = "t".repeat(len);
        let result = validate_title(&title);
        if (3..=250).contains(&len) {
            prop_assert!(result.is_ok());
        } else if len == 0 {
            prop_assert_eq!(result, Err(ValidationError::EmptyTitle));
        } else {
            prop_assert_eq!(result, Err(ValidationError::TitleLengthOutOfRange(len)));
        }
    }

    #[test]
    fn multibyte_titles_use_char_count(len in 1usize..260) {
        let title = "é".repeat(len);
        prop_assert_eq!(validate_title(&title).is_ok(), (3..=250).contains(&len));
    }

    #[test]
    fn description_accepted_iff_short_enough(len in 0usize..1100) {
        let description = "d".repeat(len);
        prop_assert_eq!(validate_description(&description).is_ok(), len <= 1000);
    }

    #[test]
    fn decode_never_panics_on_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = rpc::decode(&bytes);
    }

    #[test]
    fn update_request_frames_round_trip(call_id in any::<u64>(), update in arb_update()) {
        let frame = RpcFrame::Request { call_id, call: StoreCall::UpdateTask(update) };
        let bytes = rpc::encode(&frame).unwrap();
        prop_assert_eq!(rpc::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn create_request_frames_round_trip(
        call_id in any::<u64>(),
        title in "[^\x00]{3,250}",
        priority in arb_priority(),
        due in proptest::option::of(any::<u64>()),
    ) {
        let frame = RpcFrame::Request {
            call_id,
            call: StoreCall::CreateTask(CreateTaskRequest { title, priority, due_date: due }),
        };
        let bytes = rpc::encode(&frame).unwrap();
        prop_assert_eq!(rpc::decode(&bytes).unwrap(), frame);
    }
}

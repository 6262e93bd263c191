// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use pretty_assertions::assert_eq;
use std::{collections::BTreeMap, time::Duration};
use testsched_runner::{
    ipc::ShareableResultChannel,
    outcome::{OutcomeKind, TestOutcome},
    process::{self, TerminationCode},
};

const SLOT_SIZE: usize = 256;

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| seed.wrapping_mul(31).wrapping_add(index as u8))
        .collect()
}

#[test]
fn message_three_and_a_half_slots() {
    let mut channel = ShareableResultChannel::<TestOutcome>::new(8, SLOT_SIZE).unwrap();
    let outcome = TestOutcome {
        elapsed_nanos: 1_234_567,
        group_index: 2,
        test_index: 17,
        kind: OutcomeKind::Failure,
        text: "x".repeat(SLOT_SIZE * 7 / 2),
    };

    channel.enqueue(&outcome).unwrap();
    let received = channel
        .try_dequeue(Duration::from_secs(1))
        .unwrap()
        .expect("message arrives");
    assert_eq!(received, outcome);

    let bytes = payload(7, SLOT_SIZE * 7 / 2);
    channel.send_bytes(&bytes).unwrap();
    let received = channel
        .try_receive_bytes(Duration::from_secs(1))
        .unwrap()
        .expect("payload arrives");
    assert_eq!(received, bytes);
}

#[test]
fn many_writer_processes() {
    const WRITERS: u8 = 4;
    const MESSAGES: usize = 25;

    // A small ring forces writers to wait on the reader.
    let mut channel = ShareableResultChannel::<Vec<u8>>::new(4, SLOT_SIZE).unwrap();

    let mut pids = Vec::new();
    for writer in 0..WRITERS {
        let channel = &channel;
        let pid = process::spawn(move || {
            for message in 0..MESSAGES {
                let mut body = vec![writer, message as u8];
                body.extend(payload(writer, SLOT_SIZE + message * 13));
                if channel.enqueue(&body).is_err() {
                    return 1;
                }
            }
            0
        })
        .unwrap();
        pids.push(pid);
    }

    let mut received: BTreeMap<(u8, u8), Vec<u8>> = BTreeMap::new();
    while received.len() < WRITERS as usize * MESSAGES {
        let body = channel
            .try_dequeue(Duration::from_secs(10))
            .unwrap()
            .expect("writers keep sending");
        let key = (body[0], body[1]);
        assert!(
            received.insert(key, body).is_none(),
            "message {key:?} delivered twice"
        );
    }

    for pid in pids {
        let report = process::wait_blocking(pid).unwrap();
        assert_eq!(report.code, TerminationCode::Exited(0));
    }
    for ((writer, message), body) in received {
        let expected = payload(writer, SLOT_SIZE + message as usize * 13);
        assert_eq!(&body[2..], expected.as_slice());
    }
}

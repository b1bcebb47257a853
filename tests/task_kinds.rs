// tests/task_kinds.rs

use meshconf::errors::TaskTreeError;
use meshconf::task::{
    task_for, Composition, CompositionError, ConfigTask, DcdGetTask, Element, EventStatus,
    Features, ListTask, PubGetTask, RequestStatus, StatusTask, TaskTree,
};
use meshconf::transport::{
    ConfigEvent, ConfigRequest, EventBody, EventResult, ModelId, Publication,
};
use meshconf::types::{Destination, RequestHandle};
use meshconf_test_utils::builders::appkey_add;
use meshconf_test_utils::{FakeClient, SendOutcome};

const DEST: Destination = Destination {
    netkey_index: 0,
    node_address: 0x0100,
};

fn sent(task: &mut dyn ConfigTask, client: &mut FakeClient) -> RequestHandle {
    match task.send_request(client, DEST) {
        RequestStatus::Sent(handle) => handle,
        other => panic!("expected the request to be sent, got {other:?}"),
    }
}

fn sample_composition() -> Composition {
    Composition {
        company_id: 0x0059,
        product_id: 0x0002,
        version_id: 0x0003,
        replay_protection_list_len: 16,
        features: Features {
            relay: true,
            proxy: false,
            friend: true,
            low_power: false,
        },
        elements: vec![
            Element {
                location: 0x0100,
                sig_models: vec![0x0000, 0x1000],
                vendor_models: vec![ModelId::vendor(0x0059, 0x0001)],
            },
            Element {
                location: 0x0101,
                sig_models: vec![0x1001],
                vendor_models: Vec::new(),
            },
        ],
    }
}

#[test]
fn transport_answers_map_to_request_status() {
    let mut client = FakeClient::new();
    client.script(DEST, [SendOutcome::Busy, SendOutcome::Reject]);
    let mut task = StatusTask::new(appkey_add(0));

    assert_eq!(task.send_request(&mut client, DEST), RequestStatus::Busy);
    assert_eq!(task.send_request(&mut client, DEST), RequestStatus::Failed);
    assert!(matches!(
        task.send_request(&mut client, DEST),
        RequestStatus::Sent(_)
    ));
    assert_eq!(client.sent().len(), 3);
}

#[test]
fn status_task_records_result_and_value() {
    let mut client = FakeClient::new();
    let mut task = StatusTask::new(ConfigRequest::DefaultTtlGet);
    let handle = sent(&mut task, &mut client);

    // Chunks of other responses are not for us.
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::list_chunk(handle, vec![1])),
        EventStatus::InProgress
    );
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::status_value(handle, EventResult::Success, 5)),
        EventStatus::Done
    );
    assert_eq!(task.result(), Some(EventResult::Success));
    assert_eq!(task.value(), Some(5));
    assert_eq!(task.describe(), "default ttl get -> value=5");

    // Resending forgets the previous answer.
    sent(&mut task, &mut client);
    assert_eq!(task.value(), None);
    assert_eq!(task.describe(), "default ttl get");
}

#[test]
fn status_task_maps_failures() {
    let mut task = StatusTask::new(appkey_add(3));
    let handle = RequestHandle(9);
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::status(handle, EventResult::Failed(0x03))),
        EventStatus::Failed
    );
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::status(handle, EventResult::Timeout)),
        EventStatus::Timeout
    );
    assert_eq!(task.describe(), "appkey add (appkey_idx=3,netkey_idx=0)");
}

#[test]
fn list_task_collects_chunks_until_the_end() {
    let mut client = FakeClient::new();
    let mut task = ListTask::new(ConfigRequest::ModelSubList {
        element: 0,
        model: ModelId::sig(0x1000),
    });
    let handle = sent(&mut task, &mut client);

    for chunk in [vec![0xc000, 0xc001], vec![0xc002]] {
        assert_eq!(
            task.handle_event(DEST, &ConfigEvent::list_chunk(handle, chunk)),
            EventStatus::InProgress
        );
    }
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::list_end(handle, EventResult::Success)),
        EventStatus::Done
    );
    assert_eq!(task.items(), &[0xc000, 0xc001, 0xc002]);
    assert_eq!(
        task.describe(),
        "model sub list (elem=0,model=0x1000) -> cnt=3,items=[49152,49153,49154]"
    );

    // A retry starts over.
    sent(&mut task, &mut client);
    assert!(task.items().is_empty());
}

#[test]
fn list_task_aborts_past_its_limit() {
    let mut task = ListTask::with_limit(ConfigRequest::AppKeyList { netkey_index: 0 }, 3);
    let handle = RequestHandle(1);
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::list_chunk(handle, vec![0, 1])),
        EventStatus::InProgress
    );
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::list_chunk(handle, vec![2, 3])),
        EventStatus::Aborted
    );
    assert_eq!(task.items(), &[0, 1]);
}

#[test]
fn list_task_reports_server_errors() {
    let mut task = ListTask::new(ConfigRequest::AppKeyList { netkey_index: 1 });
    assert_eq!(
        task.handle_event(
            DEST,
            &ConfigEvent::list_end(RequestHandle(1), EventResult::Failed(0x04))
        ),
        EventStatus::Failed
    );
    assert_eq!(task.describe(), "appkey list (netkey_idx=1)");
}

#[test]
fn dcd_task_parses_chunked_composition() -> Result<(), CompositionError> {
    let mut client = FakeClient::new();
    let mut task = DcdGetTask::new(0);
    let handle = sent(&mut task, &mut client);
    assert_eq!(client.sent()[0].request, ConfigRequest::DcdGet { page: 0 });

    let data = sample_composition().encode()?;
    for chunk in data.chunks(7) {
        assert_eq!(
            task.handle_event(DEST, &ConfigEvent::dcd_chunk(handle, chunk.to_vec())),
            EventStatus::InProgress
        );
    }
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::dcd_end(handle, EventResult::Success)),
        EventStatus::Done
    );

    assert_eq!(task.raw(), data.as_slice());
    assert_eq!(task.composition(), Some(&sample_composition()));
    assert_eq!(
        task.describe(),
        "dcd get (page=0) -> cid=0x0059,pid=0x0002,vid=0x0003,crpl=16,relay=1,proxy=0,friend=1,lpn=0,elements=2"
    );
    Ok(())
}

#[test]
fn dcd_task_fails_on_malformed_data() {
    let mut task = DcdGetTask::new(0);
    let handle = RequestHandle(4);
    task.handle_event(DEST, &ConfigEvent::dcd_chunk(handle, vec![0x59, 0x00, 0x02]));
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::dcd_end(handle, EventResult::Success)),
        EventStatus::Failed
    );
    assert!(task.composition().is_none());
}

#[test]
fn dcd_task_aborts_on_oversized_data() {
    let mut task = DcdGetTask::new(0);
    let handle = RequestHandle(4);
    let status = task.handle_event(
        DEST,
        &ConfigEvent::dcd_chunk(handle, vec![0; meshconf::task::MAX_DCD_SIZE + 1]),
    );
    assert_eq!(status, EventStatus::Aborted);
}

#[test]
fn composition_parse_reads_elements_and_models() {
    let parsed = Composition::parse(&sample_composition().encode().unwrap()).unwrap();
    assert_eq!(parsed.elements.len(), 2);
    let models: Vec<_> = parsed.elements[0].models().collect();
    assert_eq!(
        models,
        vec![
            ModelId::sig(0x0000),
            ModelId::sig(0x1000),
            ModelId::vendor(0x0059, 0x0001),
        ]
    );
    assert!(parsed.features.relay && parsed.features.friend);
    assert!(!parsed.features.proxy);
}

#[test]
fn composition_parse_reports_truncation() {
    assert_eq!(
        Composition::parse(&[0u8; 4]),
        Err(CompositionError::Truncated {
            offset: 0,
            needed: 10,
            available: 4,
        })
    );

    // Element header claims two SIG models but carries one.
    let mut data = Composition::default().encode().unwrap();
    data.extend_from_slice(&[0x00, 0x00, 2, 0, 0x00, 0x10]);
    assert_eq!(
        Composition::parse(&data),
        Err(CompositionError::Truncated {
            offset: 14,
            needed: 4,
            available: 2,
        })
    );
}

#[test]
fn pub_get_task_records_the_publication() {
    let mut client = FakeClient::new();
    let onoff = ModelId::sig(0x1000);
    let mut task = PubGetTask::new(0, onoff);
    let handle = sent(&mut task, &mut client);
    assert_eq!(
        client.sent()[0].request,
        ConfigRequest::ModelPubGet {
            element: 0,
            model: onoff,
        }
    );

    let publication = Publication {
        address: 0xc000,
        appkey_index: 1,
        friendship_credentials: false,
        ttl: 5,
        period_ms: 10_000,
        retransmit_count: 2,
        retransmit_interval_ms: 100,
    };
    // A plain status is not the answer to a publication read.
    assert_eq!(
        task.handle_event(DEST, &ConfigEvent::status(handle, EventResult::Success)),
        EventStatus::InProgress
    );
    assert_eq!(
        task.handle_event(
            DEST,
            &ConfigEvent::publication_status(handle, EventResult::Success, Some(publication))
        ),
        EventStatus::Done
    );
    assert_eq!(task.publication(), Some(&publication));
    assert_eq!(
        task.describe(),
        "model pub get (elem=0,model=0x1000) -> addr=0xc000,appkey_idx=1,cred=0,ttl=5,period=10000ms,tx_cnt=2,tx_interval=100ms"
    );

    let handle = sent(&mut task, &mut client);
    assert!(task.publication().is_none());
    assert_eq!(
        task.handle_event(
            DEST,
            &ConfigEvent::publication_status(handle, EventResult::Success, None)
        ),
        EventStatus::Done
    );
    assert_eq!(task.describe(), "model pub get (elem=0,model=0x1000) -> unset");
}

#[test]
fn pub_get_task_reports_server_errors() {
    let mut task = PubGetTask::new(2, ModelId::vendor(0x0059, 0x0001));
    assert_eq!(
        task.handle_event(
            DEST,
            &ConfigEvent::publication_status(RequestHandle(3), EventResult::Failed(0x02), None)
        ),
        EventStatus::Failed
    );
    assert_eq!(task.result(), Some(EventResult::Failed(0x02)));
    assert!(task.publication().is_none());
    assert_eq!(
        task.describe(),
        "model pub get (elem=2,model=0x0059:0x0001)"
    );
}

#[test]
fn composition_encode_refuses_uncountable_models() {
    let mut composition = sample_composition();
    composition.elements[1].sig_models = (0..=255u16).collect();
    assert_eq!(
        composition.encode(),
        Err(CompositionError::TooManyModels {
            element: 1,
            count: 256,
        })
    );

    // 255 still fits in the count byte.
    composition.elements[1].sig_models.pop();
    let parsed = Composition::parse(&composition.encode().unwrap()).unwrap();
    assert_eq!(parsed.elements[1].sig_models.len(), 255);
}

#[test]
fn task_for_picks_the_task_kind_by_request() {
    let mut client = FakeClient::new();

    let mut list = task_for(ConfigRequest::ModelBindingsList {
        element: 0,
        model: ModelId::sig(0x1000),
    });
    let handle = sent(list.as_mut(), &mut client);
    assert_eq!(
        list.handle_event(DEST, &ConfigEvent::list_chunk(handle, vec![1])),
        EventStatus::InProgress
    );
    assert_eq!(
        list.handle_event(DEST, &ConfigEvent::list_end(handle, EventResult::Success)),
        EventStatus::Done
    );
    assert!(list.describe().ends_with("cnt=1,items=[1]"));

    let dcd = task_for(ConfigRequest::DcdGet { page: 0 });
    assert_eq!(dcd.describe(), "dcd get (page=0)");

    let mut pub_get = task_for(ConfigRequest::ModelPubGet {
        element: 0,
        model: ModelId::sig(0x1000),
    });
    let handle = sent(pub_get.as_mut(), &mut client);
    assert_eq!(
        pub_get.handle_event(
            DEST,
            &ConfigEvent::publication_status(handle, EventResult::Success, None)
        ),
        EventStatus::Done
    );
    assert!(pub_get.describe().ends_with("-> unset"));

    let sub_set = task_for(ConfigRequest::ModelSubSet {
        element: 0,
        model: ModelId::sig(0x1000),
        address: 0xc003,
    });
    assert_eq!(
        sub_set.describe(),
        "model sub set (elem=0,model=0x1000,addr=0xc003)"
    );
    let sub_clear = task_for(ConfigRequest::ModelSubClear {
        element: 1,
        model: ModelId::sig(0x1001),
    });
    assert_eq!(sub_clear.describe(), "model sub clear (elem=1,model=0x1001)");

    let mut status = task_for(ConfigRequest::RelayGet);
    let handle = sent(status.as_mut(), &mut client);
    assert_eq!(
        status.handle_event(
            DEST,
            &ConfigEvent::new(
                handle,
                EventBody::Status {
                    result: EventResult::Success,
                    value: Some(1),
                }
            )
        ),
        EventStatus::Done
    );
    assert_eq!(status.describe(), "relay get -> value=1");
}

#[test]
fn tree_links_are_checked() {
    let mut tree = TaskTree::new();
    let a = tree.add(StatusTask::new(appkey_add(0)));
    let b = tree.add(StatusTask::new(appkey_add(1)));

    assert_eq!(tree.root(), Some(a));
    assert_eq!(tree.set_next_on_success(a, a), Err(TaskTreeError::SelfLink(a)));

    let mut other = TaskTree::new();
    other.add(StatusTask::new(appkey_add(0)));
    other.add(StatusTask::new(appkey_add(1)));
    let foreign = other.add(StatusTask::new(appkey_add(2)));
    assert_eq!(
        tree.set_next_on_failure(a, foreign),
        Err(TaskTreeError::UnknownTask(foreign))
    );

    tree.set_next_unconditional(a, b).unwrap();
    assert_eq!(tree.next_on_success(a).unwrap(), Some(b));
    assert_eq!(tree.next_on_failure(a).unwrap(), Some(b));
    assert!(tree.validate().is_ok());

    tree.set_next_on_failure(b, a).unwrap();
    assert!(matches!(tree.validate(), Err(TaskTreeError::Cycle(_))));
}

#[test]
fn sequence_links_successes_only() {
    let tree = TaskTree::sequence([appkey_add(0), appkey_add(1), appkey_add(2)].map(task_for));
    let ids: Vec<_> = tree.iter().map(|(id, _, _)| id).collect();

    assert_eq!(tree.len(), 3);
    assert_eq!(tree.next_on_success(ids[0]).unwrap(), Some(ids[1]));
    assert_eq!(tree.next_on_success(ids[1]).unwrap(), Some(ids[2]));
    assert_eq!(tree.next_on_success(ids[2]).unwrap(), None);
    assert!(ids
        .iter()
        .all(|id| tree.next_on_failure(*id).unwrap().is_none()));
}

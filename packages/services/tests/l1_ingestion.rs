use pretty_assertions::assert_eq;
use services::{
    Error, Result, Runner, SequencerBatchAppendedHandler,
    event_handler::handle_event,
    types::{QueueOrigin, storage::QueueIndexMapping},
};
use test_helpers::{CTC_ADDRESS, L2_CHAIN_ID, SUBMITTER, calldata::BatchCalldata, events};

fn two_sequenced_one_queued() -> BatchCalldata {
    BatchCalldata::new().context(1_000, 20, vec![vec![0xaa], vec![0xbb, 0xbb]], 1)
}

#[tokio::test]
async fn ingests_batches_in_log_order() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    // the second batch is included first so the node returns its log first
    setup.submit_batch(
        11,
        1,
        3,
        1,
        &BatchCalldata::new().context(1_001, 21, vec![vec![0xcc]], 1),
    );
    setup.submit_batch(10, 0, 0, 0, &two_sequenced_one_queued());
    setup.chain().set_head(11);

    let mut ingestion = setup.ingestion(0, 0, 100);

    // when
    ingestion.run().await?;

    // then
    let db = setup.db();
    let batches = db.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].index, 0);
    assert_eq!(batches[0].size, 3);
    assert_eq!(batches[0].submitter, SUBMITTER);
    assert_eq!(batches[1].prev_total_elements, 3);

    let transactions = db.transactions();
    let indices: Vec<_> = transactions.iter().map(|tx| tx.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(transactions[2].queue_origin, QueueOrigin::Queued);
    assert_eq!(transactions[3].batch_index, 1);

    assert_eq!(
        db.queue_index_mappings(),
        vec![
            QueueIndexMapping {
                queue_index: 0,
                index: 2
            },
            QueueIndexMapping {
                queue_index: 1,
                index: 4
            },
        ]
    );
    assert_eq!(db.commits(), 2);
    assert_eq!(db.highest_synced(), Some(11));

    Ok(())
}

#[tokio::test]
async fn waits_for_confirmations() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    setup.submit_batch(10, 0, 0, 0, &two_sequenced_one_queued());
    setup.chain().set_head(12);

    let mut ingestion = setup.ingestion(0, 5, 100);

    // when
    ingestion.run().await?;

    // then
    assert_eq!(setup.db().commits(), 0);
    assert_eq!(setup.db().highest_synced(), Some(7));

    Ok(())
}

#[tokio::test]
async fn nothing_to_do_below_the_start_block() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    setup.chain().set_head(3);

    let mut ingestion = setup.ingestion(10, 0, 100);

    // when
    ingestion.run().await?;

    // then
    assert_eq!(setup.db().highest_synced(), None);

    Ok(())
}

#[tokio::test]
async fn block_range_is_capped_and_resumed() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    setup.submit_batch(10, 0, 0, 0, &two_sequenced_one_queued());
    setup.submit_batch(
        30,
        1,
        3,
        1,
        &BatchCalldata::new().context(1_001, 21, vec![vec![0xcc]], 0),
    );

    let mut ingestion = setup.ingestion(5, 0, 10);

    // when
    ingestion.run().await?;

    // then
    assert_eq!(setup.db().batches().len(), 1);
    assert_eq!(setup.db().highest_synced(), Some(14));

    // when
    ingestion.run().await?;
    ingestion.run().await?;

    // then
    assert_eq!(setup.db().batches().len(), 2);
    assert_eq!(setup.db().highest_synced(), Some(30));

    Ok(())
}

#[tokio::test]
async fn missing_companion_leaves_cursor_untouched() {
    // given
    let setup = test_helpers::Setup::init();
    setup.unrelated_tx(
        10,
        vec![events::sequencer_batch_appended(CTC_ADDRESS, 0, 0, 1)],
    );

    let mut ingestion = setup.ingestion(0, 0, 100);

    // when
    let err = ingestion.run().await.unwrap_err();

    // then
    assert!(matches!(err, Error::MissingCompanionEvent { .. }));
    assert_eq!(setup.db().highest_synced(), None);
    assert_eq!(setup.db().commits(), 0);
}

#[tokio::test]
async fn fatal_errors_halt_ingestion() {
    // given
    let setup = test_helpers::Setup::init();
    setup.unrelated_tx(
        10,
        vec![events::sequencer_batch_appended(CTC_ADDRESS, 0, 0, 1)],
    );

    let mut ingestion = setup.ingestion(0, 0, 100);
    let first = ingestion.run().await.unwrap_err();
    let queries_after_failure = setup.chain().log_queries();

    // when
    let second = ingestion.run().await.unwrap_err();
    let third = ingestion.run().await.unwrap_err();

    // then
    assert!(matches!(first, Error::MissingCompanionEvent { .. }));
    assert!(matches!(second, Error::Halted(_)));
    assert!(matches!(third, Error::Halted(_)));
    assert!(second.is_fatal());
    assert!(ingestion.is_halted());
    assert_eq!(setup.chain().log_queries(), queries_after_failure);
    assert_eq!(setup.db().highest_synced(), None);
}

#[tokio::test]
async fn failed_commit_is_replayed_on_the_next_run() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    setup.submit_batch(10, 0, 0, 0, &two_sequenced_one_queued());
    let mut ingestion = setup.ingestion(0, 0, 100);

    setup.db().fail_commits(true);
    assert!(matches!(ingestion.run().await, Err(Error::Storage(_))));
    assert_eq!(setup.db().highest_synced(), None);
    assert!(!ingestion.is_halted());

    // when
    setup.db().fail_commits(false);
    ingestion.run().await?;

    // then
    assert_eq!(setup.db().transactions().len(), 3);
    assert_eq!(setup.db().highest_synced(), Some(10));

    Ok(())
}

#[tokio::test]
async fn handling_the_same_event_twice_is_idempotent() -> Result<()> {
    // given
    let setup = test_helpers::Setup::init();
    let batch = setup.submit_batch(10, 0, 0, 0, &two_sequenced_one_queued());
    let handler = SequencerBatchAppendedHandler::new();

    handle_event(
        &handler,
        batch.sequencer_batch_appended.clone(),
        &setup.chain(),
        &setup.db(),
        L2_CHAIN_ID,
    )
    .await?;
    let transactions = setup.db().transactions();

    // when
    handle_event(
        &handler,
        batch.sequencer_batch_appended,
        &setup.chain(),
        &setup.db(),
        L2_CHAIN_ID,
    )
    .await?;

    // then
    assert_eq!(setup.db().transactions(), transactions);
    assert_eq!(setup.db().batches().len(), 1);
    assert_eq!(setup.db().queue_index_mappings().len(), 1);

    Ok(())
}

//! End-to-end measurement scenarios against the simulated instrument

use rusty_smu::smu::{abort, run_anonymous};
use rusty_smu::{
    CancellationFlag, Column, InstrumentConnection, MeasurementRecord, MeasurementTable,
    Orchestrator, ScriptLoader, SimInstrument, SmuError, StreamReader, SweepOutcome, TableStore,
    read_table,
};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SCRIPT: &str = "smua.reset()\nsmua.source.levelv = 1\nprint(\"@@\" .. 1)\n";

fn open_sim(sim: &SimInstrument) -> InstrumentConnection {
    InstrumentConnection::builder()
        .address("sim://0")
        .baud_rate(57600)
        .poll_interval(Duration::from_millis(1))
        .simulator(sim.clone())
        .open()
        .unwrap()
}

fn write_scripts(dir: &Path) {
    for name in [
        "transfer-charact.tsp",
        "transfer-charact-2.tsp",
        "output-charact.tsp",
    ] {
        fs::write(dir.join(name), SCRIPT).unwrap();
    }
}

fn three_point_run(sim: &SimInstrument) {
    sim.on_run([
        "@@1.0,0.0,2.0,0.001",
        "@@1.5,0.0,2.3,0.0012",
        "@@2.0,0.0,2.6,0.0013",
        "EE",
    ]);
}

#[test]
fn realtime_scan_collects_gate_voltage_and_fourth_field() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());
    let sim = SimInstrument::new();
    three_point_run(&sim);
    let mut connection = open_sim(&sim);

    let session = ScriptLoader::new(dir.path())
        .upload(&mut connection, "transfer-charact.tsp")
        .unwrap();
    assert_eq!(session.lines.len(), 3);
    run_anonymous(&mut connection).unwrap();

    let cancel = CancellationFlag::new();
    let table = StreamReader::new(&cancel)
        .read(&mut connection)
        .completed()
        .unwrap();

    assert_eq!(table.len(), 3);
    assert_eq!(table.column(Column::GateVoltage).unwrap(), &[1.0, 1.5, 2.0]);
    assert_eq!(
        table.column(Column::ChannelCurrent).unwrap(),
        &[0.001, 0.0012, 0.0013]
    );
    assert!(table.column(Column::ChannelVoltage).is_none());
}

#[test]
fn cancel_after_second_line_aborts_once_and_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());
    let out = dir.path().join("out");
    let sim = SimInstrument::new();
    three_point_run(&sim);

    let cancel = CancellationFlag::new();
    sim.cancel_after(2, cancel.clone());
    let mut connection = open_sim(&sim);

    let orchestrator = Orchestrator::new(ScriptLoader::new(dir.path()), TableStore::new(&out));
    let outcome = orchestrator.run_transfer("s1", &mut connection, &cancel, None);

    assert!(outcome.is_cancelled());
    assert!(!out.exists() || fs::read_dir(&out).unwrap().next().is_none());

    let sent = sim.sent_lines();
    let abort_start = sent
        .iter()
        .position(|line| line == "smua.source.output = smua.OUTPUT_OFF")
        .unwrap();
    assert_eq!(
        &sent[abort_start..],
        &[
            "smua.source.output = smua.OUTPUT_OFF",
            "smub.source.output = smub.OUTPUT_OFF",
            "reset()",
        ]
    );
    assert_eq!(sent.iter().filter(|line| *line == "reset()").count(), 1);
    // the reverse scan never started
    assert_eq!(sim.run_count(), 1);
}

#[test]
fn cancellation_is_reported_distinctly_from_failure() {
    let sim = SimInstrument::new();
    sim.on_run(["@@0.1,0,0,1e-9"]);
    let mut connection = open_sim(&sim);
    connection.write("script.anonymous.run()").unwrap();

    let cancel = CancellationFlag::new();
    sim.cancel_after(1, cancel.clone());
    match StreamReader::new(&cancel).read(&mut connection) {
        SweepOutcome::Cancelled => {}
        SweepOutcome::Completed(_) => panic!("stalled scan cannot complete"),
        SweepOutcome::Failed(e) => panic!("cancellation reported as failure: {e}"),
    }
}

#[test]
fn close_is_idempotent() {
    let sim = SimInstrument::new();
    let mut connection = open_sim(&sim);

    assert!(connection.close().is_ok());
    assert!(matches!(connection.close(), Err(SmuError::NotConnected(_))));
    assert!(!connection.is_open());
    assert_eq!(sim.open_sessions(), 0);
}

#[test]
fn abort_on_closed_connection_sends_nothing() {
    let sim = SimInstrument::new();
    let mut connection = open_sim(&sim);
    connection.close().unwrap();

    assert!(abort(&mut connection).is_err());
    assert!(sim.sent_lines().is_empty());
}

#[test]
fn upload_sends_each_line_between_markers() {
    let dir = tempfile::tempdir().unwrap();
    let body = "-- sweep\n\nsmua.source.levelv = 0\n  print(\"@@\")\n";
    fs::write(dir.path().join("custom.tsp"), body).unwrap();
    let sim = SimInstrument::new();
    let mut connection = open_sim(&sim);

    ScriptLoader::new(dir.path())
        .upload(&mut connection, "custom.tsp")
        .unwrap();

    let sent = sim.sent_lines();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(sent.len(), lines.len() + 2);
    assert_eq!(sent.first().map(String::as_str), Some("loadscript"));
    assert_eq!(sent.last().map(String::as_str), Some("endscript"));
    assert_eq!(&sent[1..sent.len() - 1], lines.as_slice());
}

#[test]
fn output_sweep_round_trips_through_tsv() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());
    let sim = SimInstrument::new();
    let records = [
        MeasurementRecord::new(-1.0, 0.0, -1.5e-7, 2e-12),
        MeasurementRecord::new(-1.0, -0.25, -3.25e-6, 1.9e-12),
        MeasurementRecord::new(-1.0, -0.5, -6.125e-6, 2.1e-12),
    ];
    sim.set_buffers(&records);
    sim.on_run(Vec::<String>::new());
    let mut connection = open_sim(&sim);

    let store = TableStore::new(dir.path().join("data"));
    let orchestrator = Orchestrator::new(ScriptLoader::new(dir.path()), store.clone());
    let table = orchestrator
        .run_output("blank-20-1", &mut connection, &CancellationFlag::new())
        .completed()
        .unwrap();

    assert_eq!(table, MeasurementTable::from_records(&records));
    let reloaded = read_table(&store.path_for("blank-20-1", "output")).unwrap();
    assert_eq!(reloaded, table);
}

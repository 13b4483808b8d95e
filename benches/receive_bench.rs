use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use gossip_calendar::appointment::SlotTime;
use gossip_calendar::{Appointment, Node, Weekday};

/// Measure the merge path: one node receiving a large partial log from a
/// peer it has never spoken to.
fn bench_receive(c: &mut Criterion) {
    let days = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
    ];
    let slots = [
        "8:00am", "9:00am", "10:00am", "11:00am", "12:00pm", "1:00pm", "2:00pm", "3:00pm",
    ];

    let mut g = c.benchmark_group("receive");
    // Only this many slots exist in a week, so older appointments are
    // cancelled as the schedule wraps around; longer histories mean more
    // tombstones, which is the realistic shape of a long-lived log.
    let capacity = days.len() * (slots.len() - 1);

    for &count in &[100usize, 1000] {
        // Build the sender once, outside the measurement.
        let mut sender = Node::new(0, 2);
        for i in 0..count {
            if i >= capacity {
                let _ = sender.delete(&format!("appt-{}", i - capacity));
            }
            let day = days[(i / (slots.len() - 1)) % days.len()];
            let s = i % (slots.len() - 1);
            let appt = Appointment::new(
                format!("appt-{i}"),
                day,
                SlotTime::parse(slots[s]).unwrap(),
                SlotTime::parse(slots[s + 1]).unwrap(),
                vec![0],
            )
            .unwrap();
            sender.insert(appt);
        }
        let msg = sender.sync_message_for(1);

        g.bench_function(BenchmarkId::new("merge partial log", count), |b| {
            b.iter_batched(
                || Node::new(1, 2),
                |mut receiver| {
                    let outcome = receiver.receive(black_box(&msg));
                    black_box(outcome.fresh);
                },
                BatchSize::SmallInput,
            );
        });
    }
    g.finish();
}

criterion_group!(benches, bench_receive);
criterion_main!(benches);

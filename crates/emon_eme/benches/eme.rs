use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn get_input() -> Vec<u8> {
    b"#scene bench\nThe quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(64 * 1024)
        .collect()
}

pub mod crypt {
    use divan::Bencher;
    use emon_eme::Schedule;
    use rand::{rngs::StdRng, SeedableRng};

    fn schedule() -> Schedule {
        Schedule::generate(&mut StdRng::seed_from_u64(0xE3E))
    }

    #[divan::bench]
    fn encrypt_record(bencher: Bencher) {
        let schedule = schedule();
        bencher
            .with_inputs(|| vec![0x5Au8; 96])
            .bench_local_refs(|record| schedule.encrypt(divan::black_box(record)));
    }

    #[divan::bench]
    fn decrypt_record(bencher: Bencher) {
        let schedule = schedule();
        bencher
            .with_inputs(|| vec![0x5Au8; 96])
            .bench_local_refs(|record| schedule.decrypt(divan::black_box(record)));
    }
}

pub mod compression {
    use divan::Bencher;
    use emon_eme::compression;

    #[divan::bench(sample_count = 10)]
    fn compress(bencher: Bencher) {
        bencher
            .with_inputs(super::get_input)
            .bench_refs(|data| divan::black_box(compression::compress(data)));
    }

    #[divan::bench]
    fn decompress(bencher: Bencher) {
        bencher
            .with_inputs(|| compression::compress(&super::get_input()))
            .bench_refs(|packed| divan::black_box(compression::decompress(packed).unwrap()));
    }
}

pub mod read {
    use divan::Bencher;
    use emon_eme::{write::EmeWriterOptions, EmeArchive, EmeWriter};
    use std::io::Cursor;

    fn get_archive() -> Vec<u8> {
        let mut eme = EmeWriter::new(Vec::new(), EmeWriterOptions::default()).unwrap();
        for i in 0..64 {
            eme.add_script(&format!("scene_{i:02}.txt"), &super::get_input()[..4096], None)
                .unwrap();
        }
        eme.finish().unwrap()
    }

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher.with_inputs(get_archive).bench_refs(|data| {
            divan::black_box(EmeArchive::new(Cursor::new(data)).unwrap());
        });
    }

    #[divan::bench(sample_count = 1)]
    fn read_entry_all(bencher: Bencher) {
        let mut eme = EmeArchive::new(Cursor::new(get_archive())).unwrap();

        bencher.bench_local(move || {
            for i in 0..eme.len() {
                divan::black_box(eme.read_entry(i).unwrap());
            }
        });
    }
}

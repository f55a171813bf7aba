use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra_glm::DVec2;

use fisheye::quad::fill_quad;
use fisheye::LensMap;

#[derive(Debug, Clone)]
struct BenchmarkInput {
    pub corners: [DVec2; 4],
    pub value: u32,
}

impl BenchmarkInput {
    #[inline]
    pub fn go(&self, map: &mut LensMap) {
        fill_quad(map, &self.corners, self.value, 0);
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let input1 = BenchmarkInput {
        corners: [
            DVec2::new(100.0, 100.0),
            DVec2::new(104.0, 100.0),
            DVec2::new(104.0, 104.0),
            DVec2::new(100.0, 104.0),
        ],
        value: 1,
    };

    let input2 = BenchmarkInput {
        corners: [
            DVec2::new(200.0, 96.0),
            DVec2::new(214.0, 103.0),
            DVec2::new(207.0, 117.0),
            DVec2::new(193.0, 110.0),
        ],
        value: 2,
    };

    let input3 = BenchmarkInput {
        corners: [
            DVec2::new(300.0, 100.0),
            DVec2::new(300.5, 100.0),
            DVec2::new(300.5, 100.5),
            DVec2::new(300.0, 100.5),
        ],
        value: 3,
    };

    let mut map = LensMap::new_empty(640, 480);

    let mut group = c.benchmark_group("fill_quad");
    for (i, input) in [input1, input2, input3].iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), input, |b, input| {
            b.iter(|| input.go(&mut map));
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

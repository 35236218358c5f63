// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use criterion::Throughput;

use approx_sketches::cpc::CpcSketch;
use approx_sketches::hll::HllSketch;
use approx_sketches::hll::HllType;
use approx_sketches::kll::KllSketch;

const N: u64 = 100_000;

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    group.throughput(Throughput::Elements(N));

    group.bench_function("cpc_lg11", |b| {
        b.iter(|| {
            let mut sketch = CpcSketch::new(11).unwrap();
            for i in 0..N {
                sketch.update_u64(i);
            }
            sketch.estimate()
        })
    });

    for (name, tgt) in [
        ("hll4_lg11", HllType::Hll4),
        ("hll6_lg11", HllType::Hll6),
        ("hll8_lg11", HllType::Hll8),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut sketch = HllSketch::new(11, tgt).unwrap();
                for i in 0..N {
                    sketch.update_u64(i);
                }
                sketch.estimate()
            })
        });
    }

    group.bench_function("kll_k200", |b| {
        b.iter(|| {
            let mut sketch = KllSketch::<i64>::new(200).unwrap();
            for i in 0..N {
                sketch.update(i as i64);
            }
            sketch.quantile(0.5, true)
        })
    });

    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");

    let mut cpc = CpcSketch::new(11).unwrap();
    let mut hll = HllSketch::new(11, HllType::Hll4).unwrap();
    let mut kll = KllSketch::<i64>::new(200).unwrap();
    for i in 0..N {
        cpc.update_u64(i);
        hll.update_u64(i);
        kll.update(i as i64);
    }

    group.bench_function("cpc_lg11", |b| b.iter(|| cpc.serialize()));
    group.bench_function("hll4_lg11", |b| b.iter(|| hll.serialize()));
    group.bench_function("kll_k200", |b| b.iter(|| kll.serialize()));

    group.finish();
}

criterion_group!(benches, bench_update, bench_serialize);
criterion_main!(benches);

/*!
 * Benchmarks for source preparation.
 *
 * Measures performance of:
 * - Span extraction over growing documents
 * - Reintegration of translated prose
 * - Batching of spans into translation units
 * - Pre-translation cleaning
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;

use texwai::app_config::BatchingPolicy;
use texwai::latex::cleaner::clean_source;
use texwai::latex::{reintegrate, ScanMode, SpanExtractor};
use texwai::translation::batch::build_units;

/// Generate a document body with `paragraphs` paragraphs mixing prose, math and commands.
fn generate_document(paragraphs: usize) -> String {
    let texts = [
        "We study the convergence of the method under mild assumptions.",
        "The bound $\\|x_k - x^*\\| \\le C \\rho^k$ holds for every $k$.",
        "As shown in \\cite{knuth84}, the \\emph{second} case follows directly.",
        "% reviewer note: shorten this\nSee Section~\\ref{sec:proof} for details.",
        "\\begin{equation}\n  f(x) = \\sum_{i=1}^n a_i x^i\n\\end{equation}\nwhich is a polynomial.",
    ];

    let mut document = String::from("\\documentclass{article}\n\\usepackage{amsmath}\n\\begin{document}\n");
    for i in 0..paragraphs {
        if i % 10 == 0 {
            document.push_str(&format!("\\section{{Part {}}}\\label{{sec:{}}}\n", i / 10, i));
        }
        document.push_str(texts[i % texts.len()]);
        document.push_str("\n\n");
    }
    document.push_str("\\end{document}\n");
    document
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("span_extraction");
    let extractor = SpanExtractor::new();

    for size in [10, 100, 1000].iter() {
        let document = generate_document(*size);
        group.throughput(Throughput::Bytes(document.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &document, |b, document| {
            b.iter(|| black_box(extractor.extract(document, ScanMode::Document)));
        });
    }

    group.finish();
}

fn bench_reintegrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("reintegration");
    let extractor = SpanExtractor::new();

    for size in [100, 1000].iter() {
        let document = generate_document(*size);
        let spans = extractor.extract(&document, ScanMode::Document);
        let replacements: HashMap<usize, String> = spans.iter()
            .enumerate()
            .filter(|(_, span)| span.is_prose())
            .map(|(i, span)| (i, span.slice(&document).to_uppercase()))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(reintegrate(&document, &spans, &replacements)));
        });
    }

    group.finish();
}

fn bench_build_units(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_units");
    let document = generate_document(1000);
    let spans = SpanExtractor::new().extract(&document, ScanMode::Document);

    for (name, policy) in [
        ("paragraph", BatchingPolicy::default()),
        ("whole_file", BatchingPolicy::WholeFile),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(build_units("main.tex", &document, &spans, &policy)));
        });
    }

    group.finish();
}

fn bench_clean(c: &mut Criterion) {
    let document = generate_document(1000);
    c.bench_function("clean_source", |b| {
        b.iter(|| black_box(clean_source(&document, true)));
    });
}

criterion_group!(
    extraction_benches,
    bench_extract,
    bench_reintegrate,
);

criterion_group!(
    preparation_benches,
    bench_build_units,
    bench_clean,
);

criterion_main!(
    extraction_benches,
    preparation_benches,
);

/*!
 * Common test utilities for the texwai test suite
 */

use std::sync::Arc;

use texwai::app_config::Config;
use texwai::compile::mock::MockCompiler;
use texwai::latex::SourceTree;
use texwai::pipeline::TranslationPipeline;
use texwai::providers::mock::MockProvider;
use texwai::translation::RetryPolicy;

pub const MAIN_TEX: &str = "\\documentclass{article}\n\
\\begin{document}\n\
\\title{A Study}\n\
\\maketitle\n\
Hello world, this is the introduction with $x=1$.\n\
\n\
\\input{sec1}\n\
\\bibliography{refs}\n\
\\end{document}\n";

pub const SEC1_TEX: &str = "\\section{Method}\n\
We describe the method here.\n\
\n\
\\badmacro\n\
It works as shown in \\cite{knuth}.\n";

pub const REFS_BIB: &str = "@book{knuth,\n  title = {The TeXbook},\n  author = {Knuth, Donald},\n  year = {1984}\n}\n";

/// Log of a latexmk run that stopped on the undefined macro in sec1.tex
pub const SEC1_ERROR_LOG: &str = "Latexmk: applying rule 'pdflatex'...\n\
./sec1.tex:4: Undefined control sequence.\n\
! Undefined control sequence.\n\
l.4 \\badmacro\n";

/// Section whose comments and blank runs must survive translation untouched
pub const COMMENTED_SECTION_TEX: &str = "% Draft notes for the reviewers\n\
\\section{Results}\n\
The results are good.\n\
\n\
\n\
\n\
\\begin{comment}\n\
Old paragraph.\n\
\\end{comment}\n\
We conclude here. % trailing remark\n";

/// Three-file tree: entry, included section and bibliography
pub fn sample_tree() -> SourceTree {
    SourceTree::from_files([
        ("main.tex", MAIN_TEX),
        ("sec1.tex", SEC1_TEX),
        ("refs.bib", REFS_BIB),
    ])
}

/// Single-file tree with one prose paragraph
pub fn single_paragraph_tree() -> SourceTree {
    SourceTree::from_files([(
        "main.tex",
        "\\documentclass{article}\n\\begin{document}\nOnly one paragraph here.\n\\end{document}\n",
    )])
}

/// Entry including `count` section files
pub fn many_sections_tree(count: usize) -> SourceTree {
    let mut main = String::from("\\documentclass{article}\n\\begin{document}\n");
    let mut tree = SourceTree::new();
    for i in 0..count {
        main.push_str(&format!("\\input{{sections/s{}}}\n", i));
        tree.insert(&format!("sections/s{}.tex", i), format!("Section {} text.\n", i));
    }
    main.push_str("\\end{document}\n");
    tree.insert("main.tex", main);
    tree
}

/// Compiler failing while sec1.tex still contains the bad macro
pub fn sec1_compiler() -> MockCompiler {
    MockCompiler::default().with_check(|tree| {
        tree.text("sec1.tex")
            .filter(|text| text.contains("\\badmacro"))
            .map(|_| SEC1_ERROR_LOG.to_string())
    })
}

/// Repair response dropping the bad macro line
pub fn remove_bad_macro(request: &texwai::providers::mock::MockRequest) -> String {
    request.text().replace("\\badmacro\n", "")
}

/// Default configuration without the pre-flight compile, so compilers only
/// see translated trees
pub fn config() -> Config {
    let mut config = Config::default();
    config.pipeline.preflight = false;
    config
}

/// Pipeline over mock services with immediate retries
pub fn pipeline_with(config: Config, provider: MockProvider, compiler: MockCompiler) -> TranslationPipeline {
    TranslationPipeline::builder(config)
        .backend(Arc::new(provider))
        .compiler(Arc::new(compiler))
        .retry(RetryPolicy::immediate(3))
        .build()
        .expect("pipeline builds with all services")
}

pub fn pipeline(provider: MockProvider, compiler: MockCompiler) -> TranslationPipeline {
    pipeline_with(config(), provider, compiler)
}

/// Initialise logging once for tests that want output
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=csrc/shim.cpp");
    println!("cargo:rerun-if-changed=csrc/shim.h");
    println!("cargo:rerun-if-env-changed=CHATGLM_DIR");
    println!("cargo:rerun-if-env-changed=CHATGLM_PREBUILT_DIR");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // ── Locate the engine ─────────────────────────────────────────────
    //
    // Mode A — **Prebuilt**: set `CHATGLM_PREBUILT_DIR` to a directory
    //   containing `lib/{libchatglm.a, libggml.a, libsentencepiece.a}`
    //   and `include/`. CMake is skipped; only the shim is compiled.
    //
    // Mode B — **CMake**: set `CHATGLM_DIR` to a chatglm.cpp source
    //   checkout (with submodules); it is built from source here.
    //
    // With neither set, native compilation is skipped entirely. The
    // crate still compiles, but anything that links against it (the
    // `native` feature of chatglm-core) will fail at link time.

    let (lib_dir, include_dirs) = if let Ok(prebuilt) = env::var("CHATGLM_PREBUILT_DIR") {
        let prebuilt = PathBuf::from(&prebuilt);
        assert!(
            prebuilt.exists(),
            "CHATGLM_PREBUILT_DIR={} does not exist",
            prebuilt.display()
        );
        let lib = if prebuilt.join("lib64").exists() {
            prebuilt.join("lib64")
        } else {
            prebuilt.join("lib")
        };
        (lib, vec![prebuilt.join("include")])
    } else if let Ok(src) = env::var("CHATGLM_DIR") {
        let src = PathBuf::from(&src);
        assert!(
            src.join("CMakeLists.txt").exists(),
            "chatglm.cpp source not found at {}. \
             Clone it with `git clone --recursive`.",
            src.display()
        );

        let mut cfg = cmake::Config::new(&src);
        cfg.define("BUILD_SHARED_LIBS", "OFF")
            .define("CHATGLM_ENABLE_EXAMPLES", "OFF")
            .define("CHATGLM_ENABLE_PYBIND", "OFF")
            .define("CHATGLM_ENABLE_TESTING", "OFF");

        if env::var("CARGO_FEATURE_CUDA").is_ok() {
            cfg.define("GGML_CUBLAS", "ON");
        }
        if target_os == "macos" {
            cfg.define("GGML_METAL", "ON");
        }

        let dst = cfg.build();
        let lib = if dst.join("lib64").exists() {
            dst.join("lib64")
        } else {
            dst.join("lib")
        };
        let includes = vec![
            src.clone(),
            src.join("third_party/ggml/include/ggml"),
            src.join("third_party/sentencepiece/src"),
        ];
        (lib, includes)
    } else {
        println!(
            "cargo:warning=Neither CHATGLM_DIR nor CHATGLM_PREBUILT_DIR is set; \
             skipping native build of chatglm.cpp (link will fail if the \
             `native` feature is used)"
        );
        return;
    };

    // ── Compile the C shim ────────────────────────────────────────────
    let mut shim = cc::Build::new();
    shim.cpp(true).std("c++17").file("csrc/shim.cpp");
    for inc in &include_dirs {
        shim.include(inc);
    }
    shim.compile("chatglm_shim");

    // ── Link libraries ────────────────────────────────────────────────
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=chatglm");

    for name in &["ggml", "sentencepiece"] {
        if lib_dir.join(format!("lib{name}.a")).exists() {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        for lib in &["cuda", "cublas", "culibos", "cudart"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }

    match target_os.as_str() {
        "linux" => {
            println!("cargo:rustc-link-lib=stdc++");
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=pthread");
        }
        "macos" => {
            println!("cargo:rustc-link-lib=c++");
            println!("cargo:rustc-link-lib=framework=Accelerate");
        }
        _ => {}
    }
}

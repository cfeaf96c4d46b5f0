// Build script to compile GLSL shaders to SPIR-V
//
// shaders/vulkan/<name>.vert|frag  -> shaders/vulkan/<name>.vert.spv|frag.spv
// shaders/glsl/<name>.vs|ps.glsl   -> shaders/spirv/<name>.vs.spv|ps.spv
//
// The GL backend reads shaders/glsl directly and the software rasterizer
// needs no compilation.

use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/vulkan");
    println!("cargo:rerun-if-changed=shaders/glsl");

    for input in files_with_suffix("shaders/vulkan", &[".vert", ".frag"]) {
        let output = PathBuf::from(format!("{}.spv", input.display()));
        compile_shader(&input, &output);
    }

    if let Err(e) = std::fs::create_dir_all("shaders/spirv") {
        println!("cargo:warning=Cannot create shaders/spirv: {}", e);
        return;
    }
    for input in files_with_suffix("shaders/glsl", &[".vs.glsl", ".ps.glsl"]) {
        let Some(file) = input.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let output = Path::new("shaders/spirv").join(file.replace(".glsl", ".spv"));
        compile_shader(&input, &output);
    }
}

fn files_with_suffix(dir: &str, suffixes: &[&str]) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| suffixes.iter().any(|s| f.ends_with(s)))
        })
        .collect();
    files.sort();
    files
}

fn compile_shader(input: &Path, output: &Path) {
    let mut command = Command::new("glslc");
    // glslc infers the stage from .vert/.frag only
    if let Some(name) = input.file_name().and_then(|f| f.to_str()) {
        if name.ends_with(".vs.glsl") {
            command.arg("-fshader-stage=vertex");
        } else if name.ends_with(".ps.glsl") {
            command.arg("-fshader-stage=fragment");
        }
    }

    match command.arg(input).arg("-o").arg(output).status() {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} not compiled", e, input.display());
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input.display(), output.display());
        }
    }
}
